//! Persistence for the account aggregate.
//!
//! The service only sees [`AccountRepository`]; the aggregate is always loaded
//! and saved whole.

mod memory;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::{Account, AccountId, UserId};

pub use memory::*;
pub use repository::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The stored account changed after this copy was loaded.
    #[error("account {0} was modified concurrently")]
    ConcurrentModification(AccountId),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Persist the account and replace its stored transactions, atomically.
    ///
    /// Fails with [`StorageError::ConcurrentModification`] if the stored row is
    /// no longer at `account.revision()`. On success the account carries the
    /// new revision.
    async fn save(&self, account: &mut Account) -> Result<(), StorageError>;

    /// Load the whole aggregate, transactions ordered by due date.
    async fn find_by_id(&self, account_id: AccountId) -> Result<Account, StorageError>;

    async fn find_accounts_by_user_id(&self, user_id: UserId)
    -> Result<Vec<Account>, StorageError>;
}

/// The revision stamp for the next save: now, but always strictly after the
/// previous revision so two saves never share a stamp.
pub(crate) fn next_revision(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(previous) if now <= previous => previous + Duration::nanoseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_next_revision_is_strictly_increasing() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        assert_eq!(next_revision(now, None), now);
        assert_eq!(next_revision(now, Some(now - Duration::hours(1))), now);
        assert_eq!(
            next_revision(now, Some(now)),
            now + Duration::nanoseconds(1)
        );
    }
}
