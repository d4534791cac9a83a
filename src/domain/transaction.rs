use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, LedgerError};

pub type TransactionId = Uuid;
pub type CategoryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Money coming in. Amount must be positive.
    Income,
    /// Money going out. Amount must be negative.
    Expense,
    /// Reconciliation entry, either sign.
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
            TransactionType::Adjustment => "ADJUSTMENT",
        }
    }

    /// Whether `amount` has the sign this type requires.
    pub fn accepts_sign_of(&self, amount: Cents) -> bool {
        match self {
            TransactionType::Income => amount > 0,
            TransactionType::Expense => amount < 0,
            TransactionType::Adjustment => true,
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INCOME" => Ok(TransactionType::Income),
            "EXPENSE" => Ok(TransactionType::Expense),
            "ADJUSTMENT" => Ok(TransactionType::Adjustment),
            _ => Err(LedgerError::InvalidTransactionType(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single entry in an account's ledger.
///
/// Only the owning [`Account`](super::Account) creates or changes these; callers
/// get copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub description: String,
    pub observation: String,
    /// Signed amount in cents, never zero
    pub amount_cents: Cents,
    pub category_id: Option<CategoryId>,
    pub due_date: DateTime<Utc>,
    /// None while the transaction is unsettled
    pub paid_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Paid, and not paid later than `now`.
    pub fn is_settled(&self, now: DateTime<Utc>) -> bool {
        self.paid_at.is_some_and(|paid_at| paid_at <= now)
    }
}
