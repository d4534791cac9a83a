use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Account, AccountId, Clock, SystemClock, UserId};

use super::{next_revision, AccountRepository, StorageError};

#[derive(Debug, Clone)]
struct StoredAccount {
    account: Account,
    created_at: DateTime<Utc>,
}

/// In-memory account repository.
///
/// Same contract as the SQLite one, revision checks included. Intended for
/// tests and embedding; nothing survives the process.
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<AccountId, StoredAccount>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loaded copies come back ordered by due date, as they would from the database.
    fn loaded(stored: &StoredAccount) -> Account {
        let account = &stored.account;
        let mut transactions = account.transactions();
        transactions.sort_by_key(|tx| tx.due_date);
        Account::rehydrate(
            account.id(),
            account.user_id(),
            account.name().to_string(),
            account.include_in_overall_balance(),
            account.archived_at(),
            transactions,
            account.revision(),
        )
    }
}

impl Default for InMemoryAccountRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn save(&self, account: &mut Account) -> Result<(), StorageError> {
        let now = self.clock.now();
        let revision = next_revision(now, account.revision());
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());

        let created_at = match accounts.get(&account.id()) {
            Some(stored) if stored.account.revision() != account.revision() => {
                return Err(StorageError::ConcurrentModification(account.id()));
            }
            Some(stored) => stored.created_at,
            None => now,
        };

        account.mark_persisted(revision);
        accounts.insert(
            account.id(),
            StoredAccount {
                account: account.clone(),
                created_at,
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, account_id: AccountId) -> Result<Account, StorageError> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(&account_id)
            .map(Self::loaded)
            .ok_or(StorageError::AccountNotFound(account_id))
    }

    async fn find_accounts_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, StorageError> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<&StoredAccount> = accounts
            .values()
            .filter(|stored| stored.account.user_id() == user_id)
            .collect();
        owned.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.account.name().cmp(b.account.name()))
        });
        Ok(owned.into_iter().map(Self::loaded).collect())
    }
}
