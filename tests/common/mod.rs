// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use fintrack::application::{AddTransactionParams, LedgerService};
use fintrack::config::StorageConfig;
use fintrack::domain::{AccountId, Cents, FixedClock, TransactionType, UserId};
use fintrack::storage::SqliteAccountRepository;
use tempfile::TempDir;

/// Everything a test needs: a service over a temporary SQLite file, the
/// repository behind it, and the clock both of them read.
pub struct TestLedger {
    pub service: LedgerService,
    pub repo: Arc<SqliteAccountRepository>,
    pub clock: Arc<FixedClock>,
    _temp: TempDir,
}

/// Helper to create a test ledger with a temporary database, clock frozen at `now`
pub async fn test_ledger(now: DateTime<Utc>) -> Result<TestLedger> {
    test_ledger_with_pool(now, 5).await
}

/// Same as [`test_ledger`] with a given pool size. One connection serializes
/// every statement, which lets tests interleave writers without SQLite lock errors.
pub async fn test_ledger_with_pool(now: DateTime<Utc>, max_connections: u32) -> Result<TestLedger> {
    let temp = TempDir::new()?;
    let db_path = temp.path().join("test.db");
    let config = StorageConfig::new(db_path.to_string_lossy()).with_max_connections(max_connections);

    let clock = Arc::new(FixedClock::new(now));
    let repo = SqliteAccountRepository::init(&config).await?;
    let repo = Arc::new(SqliteAccountRepository::with_clock(
        repo.pool().clone(),
        clock.clone(),
    ));
    let service = LedgerService::new(repo.clone(), clock.clone());

    Ok(TestLedger {
        service,
        repo,
        clock,
        _temp: temp,
    })
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Parameters for a transaction on `account_id`, due (and, when `paid`, paid) at `date`.
pub fn tx_params(
    user_id: UserId,
    account_id: AccountId,
    transaction_type: TransactionType,
    description: &str,
    amount: Cents,
    date: DateTime<Utc>,
    paid: bool,
) -> AddTransactionParams {
    AddTransactionParams {
        account_id,
        user_id,
        category_id: None,
        transaction_type,
        description: description.to_string(),
        observation: String::new(),
        amount_cents: amount,
        due_date: date,
        paid_at: paid.then_some(date),
    }
}
