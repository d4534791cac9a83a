use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{
    CategoryId, Cents, Clock, LedgerError, Transaction, TransactionId, TransactionType,
    MAX_ACCOUNT_NAME_LENGTH, MAX_DESCRIPTION_LENGTH, MAX_OBSERVATION_LENGTH,
};

pub type AccountId = Uuid;
pub type UserId = Uuid;

/// Description given to transactions synthesized by [`Account::adjust_balance`].
pub const ADJUSTMENT_DESCRIPTION: &str = "Balance adjustment";

/// Input for [`Account::add_transaction`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub description: String,
    pub observation: String,
    pub amount_cents: Cents,
    pub category_id: Option<CategoryId>,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    pub fn new(
        transaction_type: TransactionType,
        description: impl Into<String>,
        amount_cents: Cents,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_type,
            description: description.into(),
            observation: String::new(),
            amount_cents,
            category_id: None,
            due_date,
            paid_at: None,
        }
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = observation.into();
        self
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }
}

/// A user's account and the ledger of transactions it owns.
///
/// This is the consistency boundary: every change to the ledger goes through a
/// method here, and the balances are always folded from the transactions rather
/// than stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    id: AccountId,
    user_id: UserId,
    name: String,
    include_in_overall_balance: bool,
    archived_at: Option<DateTime<Utc>>,
    transactions: Vec<Transaction>,
    /// `updated_at` of the stored row this aggregate was loaded from or last saved as
    revision: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new, empty account. Included in the overall balance by default.
    pub fn new(user_id: UserId, name: impl Into<String>) -> Result<Self, LedgerError> {
        let name = name.into();
        validate_name(&name)?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            include_in_overall_balance: true,
            archived_at: None,
            transactions: Vec::new(),
            revision: None,
        })
    }

    pub fn with_overall_balance(mut self, include: bool) -> Self {
        self.include_in_overall_balance = include;
        self
    }

    /// Rebuild an aggregate from stored state. For repositories only.
    ///
    /// No validation is run: the state was valid when it was saved. Anything
    /// else must go through [`Account::new`] and the ledger methods.
    #[doc(hidden)]
    pub fn rehydrate(
        id: AccountId,
        user_id: UserId,
        name: String,
        include_in_overall_balance: bool,
        archived_at: Option<DateTime<Utc>>,
        transactions: Vec<Transaction>,
        revision: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            user_id,
            name,
            include_in_overall_balance,
            archived_at,
            transactions,
            revision,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn include_in_overall_balance(&self) -> bool {
        self.include_in_overall_balance
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn revision(&self) -> Option<DateTime<Utc>> {
        self.revision
    }

    /// Record the revision a repository just committed.
    pub fn mark_persisted(&mut self, revision: DateTime<Utc>) {
        self.revision = Some(revision);
    }

    /// Copy of the ledger, in insertion (or load) order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn transaction(&self, tx_id: TransactionId) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.id == tx_id)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    // ========================
    // Ledger mutations
    // ========================

    /// Append a transaction after checking, in order: archived state,
    /// description, observation, non-zero amount, sign, payment date, and
    /// that the projected balance still fits in [`Cents`].
    pub fn add_transaction(
        &mut self,
        new: NewTransaction,
        clock: &dyn Clock,
    ) -> Result<TransactionId, LedgerError> {
        self.ensure_not_archived()?;

        if new.description.trim().is_empty() {
            return Err(LedgerError::DescriptionRequired);
        }
        if new.description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(LedgerError::DescriptionTooLong {
                max: MAX_DESCRIPTION_LENGTH,
            });
        }
        if new.observation.chars().count() > MAX_OBSERVATION_LENGTH {
            return Err(LedgerError::ObservationTooLong {
                max: MAX_OBSERVATION_LENGTH,
            });
        }

        if new.amount_cents == 0 {
            return Err(LedgerError::AmountCannotBeZero);
        }
        if !new.transaction_type.accepts_sign_of(new.amount_cents) {
            return Err(LedgerError::InconsistentAmountSign);
        }

        if let Some(paid_at) = new.paid_at {
            if paid_at > clock.now() {
                return Err(LedgerError::PaymentDateInFuture);
            }
        }

        self.projected_balance()?
            .checked_add(new.amount_cents)
            .ok_or(LedgerError::BalanceOverflow)?;

        let id = Uuid::new_v4();
        self.transactions.push(Transaction {
            id,
            transaction_type: new.transaction_type,
            description: new.description,
            observation: new.observation,
            amount_cents: new.amount_cents,
            category_id: new.category_id,
            due_date: new.due_date,
            paid_at: new.paid_at,
        });

        Ok(id)
    }

    pub fn delete_transaction(&mut self, tx_id: TransactionId) -> Result<(), LedgerError> {
        self.ensure_not_archived()?;

        let index = self
            .transactions
            .iter()
            .position(|tx| tx.id == tx_id)
            .ok_or(LedgerError::TransactionNotFound(tx_id))?;
        self.transactions.remove(index);

        Ok(())
    }

    pub fn mark_transaction_as_paid(
        &mut self,
        tx_id: TransactionId,
        paid_at: DateTime<Utc>,
        clock: &dyn Clock,
    ) -> Result<(), LedgerError> {
        self.ensure_not_archived()?;

        if paid_at > clock.now() {
            return Err(LedgerError::PaymentDateInFuture);
        }

        let target = self.find_transaction_mut(tx_id)?;
        if target.paid_at.is_some() {
            return Err(LedgerError::TransactionAlreadyPaid);
        }
        target.paid_at = Some(paid_at);

        Ok(())
    }

    pub fn mark_transaction_as_unpaid(&mut self, tx_id: TransactionId) -> Result<(), LedgerError> {
        self.ensure_not_archived()?;

        let target = self.find_transaction_mut(tx_id)?;
        if target.paid_at.is_none() {
            return Err(LedgerError::TransactionAlreadyUnpaid);
        }
        target.paid_at = None;

        Ok(())
    }

    /// Bring the real balance to `new_balance` with a paid Adjustment entry.
    ///
    /// Returns the id of the synthesized transaction, or `None` when the real
    /// balance already matches.
    pub fn adjust_balance(
        &mut self,
        new_balance: Cents,
        clock: &dyn Clock,
    ) -> Result<Option<TransactionId>, LedgerError> {
        self.ensure_not_archived()?;

        let delta = new_balance
            .checked_sub(self.real_balance(clock)?)
            .ok_or(LedgerError::BalanceOverflow)?;
        if delta == 0 {
            return Ok(None);
        }

        let now = clock.now();
        let adjustment =
            NewTransaction::new(TransactionType::Adjustment, ADJUSTMENT_DESCRIPTION, delta, now)
                .paid_at(now);
        self.add_transaction(adjustment, clock).map(Some)
    }

    // ========================
    // Account state
    // ========================

    pub fn archive(&mut self, clock: &dyn Clock) -> Result<(), LedgerError> {
        self.ensure_not_archived()?;
        self.archived_at = Some(clock.now());
        Ok(())
    }

    pub fn unarchive(&mut self) -> Result<(), LedgerError> {
        if self.archived_at.is_none() {
            return Err(LedgerError::AccountNotArchived);
        }
        self.archived_at = None;
        Ok(())
    }

    pub fn change_name(&mut self, new_name: impl Into<String>) -> Result<(), LedgerError> {
        let new_name = new_name.into();
        validate_name(&new_name)?;
        self.name = new_name;
        Ok(())
    }

    pub fn enable_overall_balance(&mut self) -> Result<(), LedgerError> {
        if self.include_in_overall_balance {
            return Err(LedgerError::AlreadyIncludedInOverallBalance);
        }
        self.include_in_overall_balance = true;
        Ok(())
    }

    pub fn disable_overall_balance(&mut self) -> Result<(), LedgerError> {
        if !self.include_in_overall_balance {
            return Err(LedgerError::AlreadyExcludedFromOverallBalance);
        }
        self.include_in_overall_balance = false;
        Ok(())
    }

    // ========================
    // Balances
    // ========================

    /// Money the user actually has: paid transactions whose payment is not after now.
    pub fn real_balance(&self, clock: &dyn Clock) -> Result<Cents, LedgerError> {
        let now = clock.now();
        sum_cents(
            self.transactions
                .iter()
                .filter(|tx| tx.is_settled(now))
                .map(|tx| tx.amount_cents),
        )
    }

    /// Net position including every pending commitment.
    pub fn projected_balance(&self) -> Result<Cents, LedgerError> {
        sum_cents(self.transactions.iter().map(|tx| tx.amount_cents))
    }

    fn ensure_not_archived(&self) -> Result<(), LedgerError> {
        if self.archived_at.is_some() {
            return Err(LedgerError::AccountArchived);
        }
        Ok(())
    }

    fn find_transaction_mut(
        &mut self,
        tx_id: TransactionId,
    ) -> Result<&mut Transaction, LedgerError> {
        self.transactions
            .iter_mut()
            .find(|tx| tx.id == tx_id)
            .ok_or(LedgerError::TransactionNotFound(tx_id))
    }
}

/// Sum amounts, failing instead of wrapping when the total leaves the `i64` range.
pub fn sum_cents(amounts: impl IntoIterator<Item = Cents>) -> Result<Cents, LedgerError> {
    amounts.into_iter().try_fold(0, |total: Cents, amount| {
        total.checked_add(amount).ok_or(LedgerError::BalanceOverflow)
    })
}

fn validate_name(name: &str) -> Result<(), LedgerError> {
    if name.trim().is_empty() {
        return Err(LedgerError::AccountNameRequired);
    }
    if name.chars().count() > MAX_ACCOUNT_NAME_LENGTH {
        return Err(LedgerError::AccountNameTooLong {
            max: MAX_ACCOUNT_NAME_LENGTH,
        });
    }
    Ok(())
}
