use thiserror::Error;

use super::TransactionId;

pub const MAX_ACCOUNT_NAME_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 100;
pub const MAX_OBSERVATION_LENGTH: usize = 2500;

/// Every way a ledger rule can reject a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account name is required")]
    AccountNameRequired,

    #[error("account name cannot exceed {max} characters")]
    AccountNameTooLong { max: usize },

    #[error("account is already archived")]
    AccountArchived,

    #[error("account is not archived")]
    AccountNotArchived,

    #[error("account is already included in the overall balance")]
    AlreadyIncludedInOverallBalance,

    #[error("account is already excluded from the overall balance")]
    AlreadyExcludedFromOverallBalance,

    #[error("transaction not found in this account: {0}")]
    TransactionNotFound(TransactionId),

    #[error("transaction is already marked as paid")]
    TransactionAlreadyPaid,

    #[error("transaction is already marked as unpaid")]
    TransactionAlreadyUnpaid,

    #[error("payment date cannot be in the future")]
    PaymentDateInFuture,

    #[error("transaction amount cannot be zero")]
    AmountCannotBeZero,

    #[error("transaction description is required")]
    DescriptionRequired,

    #[error("transaction description cannot exceed {max} characters")]
    DescriptionTooLong { max: usize },

    #[error("transaction observation cannot exceed {max} characters")]
    ObservationTooLong { max: usize },

    #[error("transaction amount sign is inconsistent with its type")]
    InconsistentAmountSign,

    #[error("invalid transaction type: {0}")]
    InvalidTransactionType(String),

    #[error("balance is out of the representable range")]
    BalanceOverflow,
}

impl LedgerError {
    /// True for the "already in that state" toggles, which callers may treat as no-ops.
    pub fn is_already_set(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyIncludedInOverallBalance
                | LedgerError::AlreadyExcludedFromOverallBalance
        )
    }
}
