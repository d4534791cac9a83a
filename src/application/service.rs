use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::StorageConfig;
use crate::domain::{
    sum_cents, Account, AccountId, CategoryId, Cents, Clock, LedgerError, NewTransaction,
    SystemClock, TransactionId, TransactionType, UserId,
};
use crate::storage::{AccountRepository, SqliteAccountRepository, StorageError};

use super::AppError;

/// Attempts per use case when the account changes under us between load and save.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Application service providing the ledger use cases.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct LedgerService {
    repo: Arc<dyn AccountRepository>,
    clock: Arc<dyn Clock>,
}

/// Input for [`LedgerService::add_transaction_to_account`]
#[derive(Debug, Clone)]
pub struct AddTransactionParams {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub category_id: Option<CategoryId>,
    pub transaction_type: TransactionType,
    pub description: String,
    pub observation: String,
    pub amount_cents: Cents,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Input for [`LedgerService::update_account`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateAccountParams {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub name: Option<String>,
    pub include_in_overall_balance: Option<bool>,
}

/// Input for [`LedgerService::adjust_account_balance`]
#[derive(Debug, Clone)]
pub struct AdjustBalanceParams {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub new_balance: Cents,
}

/// Both balance views of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub real: Cents,
    pub projected: Cents,
}

/// Balances summed over the accounts that count towards the overall balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallBalance {
    pub real: Cents,
    pub projected: Cents,
    pub accounts: Vec<AccountBalance>,
}

impl LedgerService {
    pub fn new(repo: Arc<dyn AccountRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Create (or migrate) a SQLite database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        Self::from_config(&StorageConfig::new(database_path)).await
    }

    /// Connect to an existing SQLite database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let repo = SqliteAccountRepository::connect(&StorageConfig::new(database_path)).await?;
        Ok(Self::new(Arc::new(repo), Arc::new(SystemClock)))
    }

    /// Connect with explicit pool settings, running migrations.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, AppError> {
        let repo = SqliteAccountRepository::init(config).await?;
        Ok(Self::new(Arc::new(repo), Arc::new(SystemClock)))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ========================
    // Account operations
    // ========================

    #[instrument(skip(self, name), err)]
    pub async fn create_account(
        &self,
        user_id: UserId,
        name: String,
        include_in_overall_balance: bool,
    ) -> Result<Account, AppError> {
        let mut account =
            Account::new(user_id, name)?.with_overall_balance(include_in_overall_balance);
        self.repo.save(&mut account).await?;

        info!(account_id = %account.id(), "account created");
        Ok(account)
    }

    /// Look up an account on behalf of `user_id`.
    ///
    /// An account owned by someone else is reported exactly like a missing one.
    #[instrument(skip(self), err(level = "debug"))]
    pub async fn find_account_by_id(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        match self.repo.find_by_id(account_id).await {
            Ok(account) if account.user_id() == user_id => Ok(account),
            Ok(_) | Err(StorageError::AccountNotFound(_)) => {
                Err(AppError::AccountNotFound(account_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn find_accounts_by_user_id(&self, user_id: UserId) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.find_accounts_by_user_id(user_id).await?)
    }

    /// Rename and/or toggle overall-balance inclusion. Toggling to the state the
    /// account is already in is not an error.
    #[instrument(skip(self, params), fields(user_id = %params.user_id, account_id = %params.account_id), err)]
    pub async fn update_account(&self, params: UpdateAccountParams) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(params.user_id, params.account_id, |account, _| {
                if let Some(name) = &params.name {
                    account.change_name(name.clone())?;
                }
                if let Some(include) = params.include_in_overall_balance {
                    let toggled = if include {
                        account.enable_overall_balance()
                    } else {
                        account.disable_overall_balance()
                    };
                    match toggled {
                        Err(err) if err.is_already_set() => {}
                        other => other?,
                    }
                }
                Ok(())
            })
            .await?;
        Ok(account)
    }

    #[instrument(skip(self), err)]
    pub async fn archive_account(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(user_id, account_id, |account, clock| account.archive(clock))
            .await?;
        Ok(account)
    }

    #[instrument(skip(self), err)]
    pub async fn unarchive_account(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(user_id, account_id, |account, _| account.unarchive())
            .await?;
        Ok(account)
    }

    /// Reconcile the real balance to `new_balance`. A matching balance changes nothing.
    #[instrument(skip(self, params), fields(user_id = %params.user_id, account_id = %params.account_id), err)]
    pub async fn adjust_account_balance(
        &self,
        params: AdjustBalanceParams,
    ) -> Result<Account, AppError> {
        let (account, adjustment) = self
            .mutate_account(params.user_id, params.account_id, |account, clock| {
                account.adjust_balance(params.new_balance, clock)
            })
            .await?;

        if let Some(tx_id) = adjustment {
            info!(transaction_id = %tx_id, "balance adjusted");
        }
        Ok(account)
    }

    // ========================
    // Transaction operations
    // ========================

    #[instrument(skip(self, params), fields(user_id = %params.user_id, account_id = %params.account_id), err)]
    pub async fn add_transaction_to_account(
        &self,
        params: AddTransactionParams,
    ) -> Result<TransactionId, AppError> {
        let (_, tx_id) = self
            .mutate_account(params.user_id, params.account_id, |account, clock| {
                let new = NewTransaction {
                    transaction_type: params.transaction_type,
                    description: params.description.clone(),
                    observation: params.observation.clone(),
                    amount_cents: params.amount_cents,
                    category_id: params.category_id,
                    due_date: params.due_date,
                    paid_at: params.paid_at,
                };
                account.add_transaction(new, clock)
            })
            .await?;
        Ok(tx_id)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_transaction(
        &self,
        user_id: UserId,
        account_id: AccountId,
        transaction_id: TransactionId,
    ) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(user_id, account_id, |account, _| {
                account.delete_transaction(transaction_id)
            })
            .await?;
        Ok(account)
    }

    /// Mark a transaction paid at `paid_at`, or now when not given.
    #[instrument(skip(self), err)]
    pub async fn mark_transaction_as_paid(
        &self,
        user_id: UserId,
        account_id: AccountId,
        transaction_id: TransactionId,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(user_id, account_id, |account, clock| {
                let paid_at = paid_at.unwrap_or_else(|| clock.now());
                account.mark_transaction_as_paid(transaction_id, paid_at, clock)
            })
            .await?;
        Ok(account)
    }

    #[instrument(skip(self), err)]
    pub async fn mark_transaction_as_unpaid(
        &self,
        user_id: UserId,
        account_id: AccountId,
        transaction_id: TransactionId,
    ) -> Result<Account, AppError> {
        let (account, ()) = self
            .mutate_account(user_id, account_id, |account, _| {
                account.mark_transaction_as_unpaid(transaction_id)
            })
            .await?;
        Ok(account)
    }

    // ========================
    // Balances
    // ========================

    pub async fn account_balance(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> Result<AccountBalance, AppError> {
        let account = self.find_account_by_id(user_id, account_id).await?;
        self.balance_of(&account)
    }

    /// Sum over the user's unarchived accounts that are included in the overall balance.
    pub async fn overall_balance(&self, user_id: UserId) -> Result<OverallBalance, AppError> {
        let accounts = self
            .find_accounts_by_user_id(user_id)
            .await?
            .iter()
            .filter(|account| account.include_in_overall_balance() && !account.is_archived())
            .map(|account| self.balance_of(account))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OverallBalance {
            real: sum_cents(accounts.iter().map(|b| b.real))?,
            projected: sum_cents(accounts.iter().map(|b| b.projected))?,
            accounts,
        })
    }

    pub fn balance_of(&self, account: &Account) -> Result<AccountBalance, AppError> {
        Ok(AccountBalance {
            account_id: account.id(),
            real: account.real_balance(self.clock.as_ref())?,
            projected: account.projected_balance()?,
        })
    }

    /// Load the caller's account, apply `mutate`, save the whole aggregate.
    ///
    /// If the account was saved by someone else in between, the cycle starts over
    /// from a fresh load, so `mutate` may run more than once.
    async fn mutate_account<T, F>(
        &self,
        user_id: UserId,
        account_id: AccountId,
        mut mutate: F,
    ) -> Result<(Account, T), AppError>
    where
        F: FnMut(&mut Account, &dyn Clock) -> Result<T, LedgerError> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            let mut account = self.find_account_by_id(user_id, account_id).await?;
            let outcome = mutate(&mut account, self.clock.as_ref())?;

            match self.repo.save(&mut account).await {
                Ok(()) => return Ok((account, outcome)),
                Err(StorageError::ConcurrentModification(_)) if attempt < MAX_SAVE_ATTEMPTS => {
                    warn!(%account_id, attempt, "account changed during update, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
