mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use common::{parse_date, test_ledger};
use fintrack::domain::{Account, FixedClock, NewTransaction, Transaction, TransactionType};
use fintrack::storage::{AccountRepository, StorageError};
use sqlx::Row;
use uuid::Uuid;

fn sorted_by_due_date(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by_key(|tx| tx.due_date);
    transactions
}

#[tokio::test]
async fn test_round_trip_preserves_aggregate() -> Result<()> {
    let now = parse_date("2024-03-31");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);
    let category = Uuid::new_v4();

    let mut account = Account::new(Uuid::new_v4(), "Checking")?.with_overall_balance(false);
    account.add_transaction(
        NewTransaction::new(
            TransactionType::Expense,
            "Rent",
            -120000,
            parse_date("2024-03-05"),
        )
        .with_category(category)
        .with_observation("March rent, paid by transfer")
        .paid_at(parse_date("2024-03-04")),
        &clock,
    )?;
    account.add_transaction(
        NewTransaction::new(
            TransactionType::Income,
            "Salary",
            500000,
            parse_date("2024-03-01"),
        )
        .paid_at(parse_date("2024-03-01")),
        &clock,
    )?;
    account.add_transaction(
        NewTransaction::new(
            TransactionType::Expense,
            "Insurance",
            -8000,
            parse_date("2024-04-10"),
        ),
        &clock,
    )?;
    account.archive(&clock)?;

    ledger.repo.save(&mut account).await?;
    assert_eq!(account.revision(), Some(now));

    let loaded = ledger.repo.find_by_id(account.id()).await?;
    assert_eq!(loaded.id(), account.id());
    assert_eq!(loaded.user_id(), account.user_id());
    assert_eq!(loaded.name(), "Checking");
    assert!(!loaded.include_in_overall_balance());
    assert_eq!(loaded.archived_at(), Some(now));
    assert_eq!(loaded.revision(), account.revision());
    assert_eq!(
        loaded.transactions(),
        sorted_by_due_date(account.transactions())
    );
    assert_eq!(loaded.real_balance(&clock)?, account.real_balance(&clock)?);
    assert_eq!(loaded.projected_balance()?, 372000);

    Ok(())
}

#[tokio::test]
async fn test_find_missing_account() -> Result<()> {
    let ledger = test_ledger(parse_date("2024-01-01")).await?;
    let missing = Uuid::new_v4();

    let err = ledger.repo.find_by_id(missing).await.unwrap_err();
    assert!(matches!(err, StorageError::AccountNotFound(id) if id == missing));

    Ok(())
}

#[tokio::test]
async fn test_save_replaces_child_rows() -> Result<()> {
    let now = parse_date("2024-05-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);

    let mut account = Account::new(Uuid::new_v4(), "Wallet")?;
    let first = account.add_transaction(
        NewTransaction::new(TransactionType::Income, "Gift", 2500, now),
        &clock,
    )?;
    let second = account.add_transaction(
        NewTransaction::new(TransactionType::Expense, "Lunch", -1200, now),
        &clock,
    )?;
    ledger.repo.save(&mut account).await?;

    account.delete_transaction(first)?;
    ledger.clock.advance(Duration::minutes(5));
    ledger.repo.save(&mut account).await?;

    let rows = sqlx::query("SELECT id FROM transactions WHERE account_id = ?")
        .bind(account.id().to_string())
        .fetch_all(ledger.repo.pool())
        .await?;
    let ids: Vec<String> = rows.iter().map(|r| r.get("id")).collect();
    assert_eq!(ids, vec![second.to_string()]);

    let loaded = ledger.repo.find_by_id(account.id()).await?;
    assert_eq!(loaded.transaction_count(), 1);
    assert_eq!(loaded.projected_balance()?, -1200);

    Ok(())
}

#[tokio::test]
async fn test_rewrite_keeps_transaction_created_at() -> Result<()> {
    let now = parse_date("2024-05-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);

    let mut account = Account::new(Uuid::new_v4(), "Wallet")?;
    let tx_id = account.add_transaction(
        NewTransaction::new(TransactionType::Income, "Gift", 2500, now),
        &clock,
    )?;
    ledger.repo.save(&mut account).await?;

    ledger.clock.advance(Duration::days(1));
    account.mark_transaction_as_paid(tx_id, now, &clock)?;
    ledger.repo.save(&mut account).await?;

    let row = sqlx::query("SELECT created_at, updated_at FROM transactions WHERE id = ?")
        .bind(tx_id.to_string())
        .fetch_one(ledger.repo.pool())
        .await?;
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    assert!(created_at.starts_with("2024-05-01"));
    assert!(updated_at.starts_with("2024-05-02"));

    Ok(())
}

#[tokio::test]
async fn test_failed_save_rolls_back_everything() -> Result<()> {
    let now = parse_date("2024-06-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);

    let mut account = Account::new(Uuid::new_v4(), "Checking")?;
    account.add_transaction(
        NewTransaction::new(TransactionType::Income, "Salary", 300000, now).paid_at(now),
        &clock,
    )?;
    ledger.repo.save(&mut account).await?;

    // A zero amount can only come from a corrupted aggregate; the table CHECK
    // rejects it halfway through the save.
    let mut broken_rows = account.transactions();
    let template = broken_rows[0].clone();
    broken_rows.push(Transaction {
        id: Uuid::new_v4(),
        amount_cents: 0,
        ..template
    });
    let mut corrupted = Account::rehydrate(
        account.id(),
        account.user_id(),
        "Renamed".to_string(),
        account.include_in_overall_balance(),
        None,
        broken_rows,
        account.revision(),
    );

    let err = ledger.repo.save(&mut corrupted).await.unwrap_err();
    assert!(matches!(err, StorageError::Database(_)));
    assert_eq!(corrupted.revision(), account.revision());

    let stored = ledger.repo.find_by_id(account.id()).await?;
    assert_eq!(stored.name(), "Checking");
    assert_eq!(stored.transactions(), account.transactions());
    assert_eq!(stored.revision(), account.revision());

    Ok(())
}

#[tokio::test]
async fn test_save_from_stale_snapshot_is_rejected() -> Result<()> {
    let now = parse_date("2024-07-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);

    let mut account = Account::new(Uuid::new_v4(), "Checking")?;
    ledger.repo.save(&mut account).await?;

    // Two writers start from the same loaded snapshot.
    let mut first = ledger.repo.find_by_id(account.id()).await?;
    let mut second = ledger.repo.find_by_id(account.id()).await?;
    first.add_transaction(
        NewTransaction::new(TransactionType::Income, "Refund", 1500, now),
        &clock,
    )?;
    second.add_transaction(
        NewTransaction::new(TransactionType::Expense, "Coffee", -450, now),
        &clock,
    )?;

    ledger.repo.save(&mut first).await?;
    let err = ledger.repo.save(&mut second).await.unwrap_err();
    assert!(matches!(err, StorageError::ConcurrentModification(id) if id == account.id()));

    let stored = ledger.repo.find_by_id(account.id()).await?;
    assert_eq!(stored.transaction_count(), 1);
    assert_eq!(stored.projected_balance()?, 1500);

    Ok(())
}

#[tokio::test]
async fn test_revisions_advance_even_with_a_frozen_clock() -> Result<()> {
    let now = parse_date("2024-07-01");
    let ledger = test_ledger(now).await?;

    let mut account = Account::new(Uuid::new_v4(), "Checking")?;
    ledger.repo.save(&mut account).await?;
    let first = account.revision();

    account.change_name("Everyday")?;
    ledger.repo.save(&mut account).await?;
    assert!(account.revision() > first);

    let stored = ledger.repo.find_by_id(account.id()).await?;
    assert_eq!(stored.name(), "Everyday");
    assert_eq!(stored.revision(), account.revision());

    Ok(())
}

#[tokio::test]
async fn test_find_accounts_by_user_id() -> Result<()> {
    let now = parse_date("2024-08-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);
    let user = Uuid::new_v4();

    let mut checking = Account::new(user, "Checking")?;
    checking.add_transaction(
        NewTransaction::new(TransactionType::Income, "Salary", 100000, now),
        &clock,
    )?;
    ledger.repo.save(&mut checking).await?;

    ledger.clock.advance(Duration::hours(1));
    let mut savings = Account::new(user, "Savings")?;
    savings.add_transaction(
        NewTransaction::new(TransactionType::Adjustment, "Opening", 50000, now),
        &clock,
    )?;
    ledger.repo.save(&mut savings).await?;

    let mut foreign = Account::new(Uuid::new_v4(), "Someone else's")?;
    ledger.repo.save(&mut foreign).await?;

    let accounts = ledger.repo.find_accounts_by_user_id(user).await?;
    let names: Vec<&str> = accounts.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["Checking", "Savings"]);
    assert_eq!(accounts[0].projected_balance()?, 100000);
    assert_eq!(accounts[1].projected_balance()?, 50000);

    assert!(ledger
        .repo
        .find_accounts_by_user_id(Uuid::new_v4())
        .await?
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn test_migrate_is_idempotent() -> Result<()> {
    let ledger = test_ledger(parse_date("2024-01-01")).await?;
    let mut account = Account::new(Uuid::new_v4(), "Checking")?;
    ledger.repo.save(&mut account).await?;

    ledger.repo.migrate().await?;

    assert!(ledger.repo.find_by_id(account.id()).await.is_ok());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reads_never_mix_two_saves() -> Result<()> {
    let now = parse_date("2024-09-01");
    let ledger = test_ledger(now).await?;
    let clock = FixedClock::new(now);

    // The name always spells out how many transactions the saved state holds.
    let mut account = Account::new(Uuid::new_v4(), "v0")?;
    ledger.repo.save(&mut account).await?;
    let account_id = account.id();

    let writer_repo = Arc::clone(&ledger.repo);
    let writer = tokio::spawn(async move {
        for n in 1..=40 {
            account.change_name(format!("v{n}"))?;
            account.add_transaction(
                NewTransaction::new(TransactionType::Income, "Tick", 100, now),
                &clock,
            )?;
            writer_repo.save(&mut account).await?;
        }
        anyhow::Ok(())
    });

    let mut reads = 0;
    while !writer.is_finished() || reads == 0 {
        let loaded = ledger.repo.find_by_id(account_id).await?;
        assert_eq!(loaded.name(), format!("v{}", loaded.transaction_count()));
        let listed = ledger.repo.find_accounts_by_user_id(loaded.user_id()).await?;
        assert_eq!(listed[0].name(), format!("v{}", listed[0].transaction_count()));
        reads += 1;
    }
    writer.await??;

    let last = ledger.repo.find_by_id(account_id).await?;
    assert_eq!(last.name(), "v40");
    assert_eq!(last.transaction_count(), 40);

    Ok(())
}
