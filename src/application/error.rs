use thiserror::Error;

use crate::domain::{AccountId, LedgerError};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AppError {
    /// Also returned when the account exists but belongs to someone else.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account {0} was modified concurrently, try again")]
    ConcurrentModification(AccountId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::AccountNotFound(_))
    }

    /// Caller input broke a ledger rule; fixing the input fixes the call.
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Ledger(_))
    }

    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            AppError::Ledger(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AccountNotFound(id) => AppError::AccountNotFound(id),
            StorageError::ConcurrentModification(id) => AppError::ConcurrentModification(id),
            StorageError::Database(err) => AppError::Database(err),
        }
    }
}
