use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::domain::{Account, AccountId, Clock, SystemClock, Transaction, UserId};

use super::{next_revision, AccountRepository, StorageError, MIGRATION_001_INITIAL};

/// Rows per multi-row INSERT, well under SQLite's bound-variable limit.
const INSERT_BATCH_SIZE: usize = 500;

const ACCOUNT_COLUMNS: &str =
    "id, user_id, name, include_in_overall_balance, archived_at, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, user_id, category_id, type, description, observation, amount_in_cents, due_date, paid_at, metadata, created_at, updated_at";

/// SQLite-backed account repository.
///
/// `save` runs in one database transaction: upsert the account row, delete its
/// transaction rows, insert the aggregate's current transactions, commit. Any
/// failure rolls the whole thing back. Dropping the future mid-save drops the
/// transaction, which also rolls back.
#[derive(Clone)]
pub struct SqliteAccountRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteAccountRepository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new), stamping rows with `clock`.
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect to a SQLite database at the given path.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url())
            .context("Invalid database path")?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run against an already migrated database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(config: &StorageConfig) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every write of one save. Runs inside `db_tx`; the caller commits or rolls back.
    async fn write_aggregate(
        db_tx: &mut sqlx::Transaction<'_, Sqlite>,
        account: &Account,
        revision: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let stamp = to_db_time(revision);

        let upserted = sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, name, include_in_overall_balance, archived_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                include_in_overall_balance = excluded.include_in_overall_balance,
                archived_at = excluded.archived_at,
                updated_at = excluded.updated_at
            WHERE accounts.updated_at IS ?
            "#,
        )
        .bind(account.id().to_string())
        .bind(account.user_id().to_string())
        .bind(account.name())
        .bind(account.include_in_overall_balance())
        .bind(account.archived_at().map(to_db_time))
        .bind(&stamp)
        .bind(&stamp)
        .bind(account.revision().map(to_db_time))
        .execute(&mut **db_tx)
        .await
        .context("Failed to upsert account")?;

        if upserted.rows_affected() == 0 {
            return Err(StorageError::ConcurrentModification(account.id()));
        }

        // Keep the original created_at of rows that survive the rewrite.
        let existing = sqlx::query("SELECT id, created_at FROM transactions WHERE account_id = ?")
            .bind(account.id().to_string())
            .fetch_all(&mut **db_tx)
            .await
            .context("Failed to read existing transactions")?;
        let mut created: HashMap<String, String> = HashMap::with_capacity(existing.len());
        for row in &existing {
            let id: String = row.try_get("id").context("Invalid transaction row")?;
            let created_at: String = row.try_get("created_at").context("Invalid transaction row")?;
            created.insert(id, created_at);
        }

        sqlx::query("DELETE FROM transactions WHERE account_id = ?")
            .bind(account.id().to_string())
            .execute(&mut **db_tx)
            .await
            .context("Failed to delete transactions for account")?;

        let transactions = account.transactions();
        for chunk in transactions.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO transactions (id, account_id, user_id, category_id, type, description, observation, amount_in_cents, due_date, paid_at, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, tx| {
                let id = tx.id.to_string();
                let created_at = created.get(&id).cloned().unwrap_or_else(|| stamp.clone());
                row.push_bind(id)
                    .push_bind(account.id().to_string())
                    .push_bind(account.user_id().to_string())
                    .push_bind(tx.category_id.map(|c| c.to_string()))
                    .push_bind(tx.transaction_type.as_str())
                    .push_bind(tx.description.clone())
                    .push_bind(tx.observation.clone())
                    .push_bind(tx.amount_cents)
                    .push_bind(to_db_time(tx.due_date))
                    .push_bind(tx.paid_at.map(to_db_time))
                    .push_bind(created_at)
                    .push_bind(stamp.clone());
            });
            builder
                .build()
                .execute(&mut **db_tx)
                .await
                .context("Failed to bulk insert transactions")?;
        }

        Ok(())
    }

    fn row_to_account(row: &SqliteRow, transactions: Vec<Transaction>) -> Result<Account> {
        let id_str: String = row.try_get("id")?;
        let user_id_str: String = row.try_get("user_id")?;
        let archived_at_str: Option<String> = row.try_get("archived_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        Ok(Account::rehydrate(
            Uuid::parse_str(&id_str).context("Invalid account ID")?,
            Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            row.try_get("name")?,
            row.try_get::<i64, _>("include_in_overall_balance")? != 0,
            archived_at_str
                .as_deref()
                .map(from_db_time)
                .transpose()
                .context("Invalid archived_at timestamp")?,
            transactions,
            Some(from_db_time(&updated_at_str).context("Invalid updated_at timestamp")?),
        ))
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.try_get("id")?;
        let category_str: Option<String> = row.try_get("category_id")?;
        let type_str: String = row.try_get("type")?;
        let due_date_str: String = row.try_get("due_date")?;
        let paid_at_str: Option<String> = row.try_get("paid_at")?;

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            transaction_type: type_str.parse().context("Invalid transaction type")?,
            description: row.try_get("description")?,
            observation: row.try_get("observation")?,
            amount_cents: row.try_get("amount_in_cents")?,
            category_id: category_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid category ID")?,
            due_date: from_db_time(&due_date_str).context("Invalid due_date timestamp")?,
            paid_at: paid_at_str
                .as_deref()
                .map(from_db_time)
                .transpose()
                .context("Invalid paid_at timestamp")?,
        })
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    #[instrument(skip(self, account), fields(account_id = %account.id()), err)]
    async fn save(&self, account: &mut Account) -> Result<(), StorageError> {
        let revision = next_revision(self.clock.now(), account.revision());

        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        match Self::write_aggregate(&mut db_tx, account, revision).await {
            Ok(()) => {
                db_tx
                    .commit()
                    .await
                    .context("Failed to commit account")?;
                account.mark_persisted(revision);
                debug!(
                    transactions = account.transaction_count(),
                    "account saved"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = db_tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after save error");
                }
                Err(err)
            }
        }
    }

    #[instrument(skip(self), err(level = "debug"))]
    async fn find_by_id(&self, account_id: AccountId) -> Result<Account, StorageError> {
        // Both reads share one transaction so a concurrent save is seen whole or not at all.
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin read transaction")?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
        ))
        .bind(account_id.to_string())
        .fetch_optional(&mut *db_tx)
        .await
        .context("Failed to fetch account")?
        .ok_or(StorageError::AccountNotFound(account_id))?;

        let tx_rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ? ORDER BY due_date ASC, rowid ASC"
        ))
        .bind(account_id.to_string())
        .fetch_all(&mut *db_tx)
        .await
        .context("Failed to fetch transactions for account")?;

        db_tx
            .commit()
            .await
            .context("Failed to end read transaction")?;

        let transactions = tx_rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::row_to_account(&row, transactions)?)
    }

    #[instrument(skip(self), err)]
    async fn find_accounts_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, StorageError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin read transaction")?;

        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ? ORDER BY created_at ASC, name ASC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&mut *db_tx)
        .await
        .context("Failed to list accounts")?;

        let tx_rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? ORDER BY due_date ASC, rowid ASC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&mut *db_tx)
        .await
        .context("Failed to list transactions for user")?;

        db_tx
            .commit()
            .await
            .context("Failed to end read transaction")?;

        let mut by_account: HashMap<String, Vec<Transaction>> = HashMap::new();
        for row in &tx_rows {
            let account_id: String = row.try_get("account_id").context("Invalid transaction row")?;
            by_account
                .entry(account_id)
                .or_default()
                .push(Self::row_to_transaction(row)?);
        }

        let accounts = rows
            .iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let transactions = by_account.remove(&id).unwrap_or_default();
                Self::row_to_account(row, transactions)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(accounts)
    }
}

/// Fixed-width RFC 3339 so that text order in SQLite is time order.
fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {s}"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn test_db_time_orders_lexically() {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let later = base + Duration::nanoseconds(1);
        let much_later = base + Duration::seconds(1);

        assert!(to_db_time(base) < to_db_time(later));
        assert!(to_db_time(later) < to_db_time(much_later));
        assert_eq!(from_db_time(&to_db_time(later)).unwrap(), later);
    }
}
