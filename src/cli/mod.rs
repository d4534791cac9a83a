use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    AddTransactionParams, AdjustBalanceParams, LedgerService, UpdateAccountParams,
};
use crate::config::Config;
use crate::domain::{
    format_cents, parse_cents, Account, Cents, Clock, Transaction, TransactionType,
};

/// fintrack - accounts and the transactions posted against them
#[derive(Parser)]
#[command(name = "fintrack")]
#[command(about = "Track accounts, their transactions and balances")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transaction commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Overall balance across included accounts
    Balance {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// Account name
        name: String,

        /// Leave the account out of the overall balance
        #[arg(long)]
        exclude: bool,
    },

    /// List your accounts
    List {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show an account and its transactions
    Show {
        /// Account ID
        id: Uuid,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Rename an account
    Rename {
        /// Account ID
        id: Uuid,

        /// New name
        name: String,
    },

    /// Archive an account (no further changes to its ledger)
    Archive {
        /// Account ID
        id: Uuid,
    },

    /// Unarchive an account
    Unarchive {
        /// Account ID
        id: Uuid,
    },

    /// Count the account in the overall balance
    Include {
        /// Account ID
        id: Uuid,
    },

    /// Leave the account out of the overall balance
    Exclude {
        /// Account ID
        id: Uuid,
    },

    /// Set the real balance, recording the difference as an adjustment
    Adjust {
        /// Account ID
        id: Uuid,

        /// Target balance (e.g., "1250.00" or "-30")
        #[arg(allow_hyphen_values = true)]
        balance: String,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Add a transaction to an account
    Add {
        /// Account ID
        account: Uuid,

        /// Signed amount: positive for income, negative for expenses
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Transaction type: income, expense, adjustment
        #[arg(short = 't', long = "type")]
        transaction_type: String,

        /// Short description
        #[arg(short, long)]
        description: String,

        /// Free-form notes
        #[arg(short, long, default_value = "")]
        observation: String,

        /// Category ID
        #[arg(short, long)]
        category: Option<Uuid>,

        /// Due date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        due: Option<String>,

        /// Mark as paid now
        #[arg(long, conflicts_with = "paid_on")]
        paid: bool,

        /// Mark as paid on the given date (YYYY-MM-DD)
        #[arg(long)]
        paid_on: Option<String>,
    },

    /// Delete a transaction
    Delete {
        /// Account ID
        account: Uuid,

        /// Transaction ID
        id: Uuid,
    },

    /// Mark a transaction as paid
    Pay {
        /// Account ID
        account: Uuid,

        /// Transaction ID
        id: Uuid,

        /// Payment date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Mark a transaction as unpaid
    Unpay {
        /// Account ID
        account: Uuid,

        /// Transaction ID
        id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Account as printed by `show` and `list --format json`
#[derive(Debug, Serialize)]
struct AccountView {
    id: Uuid,
    name: String,
    include_in_overall_balance: bool,
    archived_at: Option<DateTime<Utc>>,
    real_balance: Cents,
    projected_balance: Cents,
    transactions: Vec<Transaction>,
}

impl AccountView {
    fn new(service: &LedgerService, account: &Account) -> Result<Self> {
        let balance = service.balance_of(account)?;
        Ok(Self {
            id: account.id(),
            name: account.name().to_string(),
            include_in_overall_balance: account.include_in_overall_balance(),
            archived_at: account.archived_at(),
            real_balance: balance.real,
            projected_balance: balance.projected,
            transactions: account.transactions(),
        })
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let storage = self.config.storage();

        if let Commands::Init = self.command {
            LedgerService::from_config(&storage).await?;
            println!("Database initialized: {}", storage.database_path);
            return Ok(());
        }

        let user = self
            .config
            .user
            .context("No user given: pass --user or set FINTRACK_USER")?;
        let service = LedgerService::from_config(&storage).await?;

        match self.command {
            Commands::Init => {}
            Commands::Account(cmd) => run_account_command(&service, user, cmd).await?,
            Commands::Tx(cmd) => run_tx_command(&service, user, cmd).await?,
            Commands::Balance { format } => run_balance_command(&service, user, format).await?,
        }
        Ok(())
    }
}

async fn run_account_command(
    service: &LedgerService,
    user: Uuid,
    cmd: AccountCommands,
) -> Result<()> {
    match cmd {
        AccountCommands::Create { name, exclude } => {
            let account = service.create_account(user, name, !exclude).await?;
            println!("Created account: {} ({})", account.name(), account.id());
        }

        AccountCommands::List { format } => {
            let accounts = service.find_accounts_by_user_id(user).await?;
            match format {
                OutputFormat::Json => {
                    let views: Vec<AccountView> = accounts
                        .iter()
                        .map(|a| AccountView::new(service, a))
                        .collect::<Result<_>>()?;
                    println!("{}", serde_json::to_string_pretty(&views)?);
                }
                OutputFormat::Table if accounts.is_empty() => println!("No accounts found."),
                OutputFormat::Table => {
                    println!(
                        "{:<36} {:<24} {:>14} {:>14} {:<8}",
                        "ID", "NAME", "REAL", "PROJECTED", "STATUS"
                    );
                    println!("{}", "-".repeat(100));
                    for account in &accounts {
                        let balance = service.balance_of(account)?;
                        println!(
                            "{:<36} {:<24} {:>14} {:>14} {:<8}",
                            account.id(),
                            truncate(account.name(), 24),
                            format_cents(balance.real),
                            format_cents(balance.projected),
                            status(account)
                        );
                    }
                }
            }
        }

        AccountCommands::Show { id, format } => {
            let account = service.find_account_by_id(user, id).await?;
            let view = AccountView::new(service, &account)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
                OutputFormat::Table => print_account(&view, &account),
            }
        }

        AccountCommands::Rename { id, name } => {
            let account = service
                .update_account(UpdateAccountParams {
                    account_id: id,
                    user_id: user,
                    name: Some(name),
                    include_in_overall_balance: None,
                })
                .await?;
            println!("Renamed account to: {}", account.name());
        }

        AccountCommands::Archive { id } => {
            let account = service.archive_account(user, id).await?;
            println!("Archived account: {}", account.name());
        }

        AccountCommands::Unarchive { id } => {
            let account = service.unarchive_account(user, id).await?;
            println!("Unarchived account: {}", account.name());
        }

        AccountCommands::Include { id } => set_inclusion(service, user, id, true).await?,

        AccountCommands::Exclude { id } => set_inclusion(service, user, id, false).await?,

        AccountCommands::Adjust { id, balance } => {
            let new_balance = parse_cents(&balance)?;
            let account = service
                .adjust_account_balance(AdjustBalanceParams {
                    account_id: id,
                    user_id: user,
                    new_balance,
                })
                .await?;
            println!(
                "Real balance of {} is now {}",
                account.name(),
                format_cents(service.balance_of(&account)?.real)
            );
        }
    }
    Ok(())
}

async fn set_inclusion(
    service: &LedgerService,
    user: Uuid,
    account_id: Uuid,
    include: bool,
) -> Result<()> {
    let account = service
        .update_account(UpdateAccountParams {
            account_id,
            user_id: user,
            name: None,
            include_in_overall_balance: Some(include),
        })
        .await?;
    println!(
        "{} {} the overall balance",
        account.name(),
        if include { "counts towards" } else { "is left out of" }
    );
    Ok(())
}

async fn run_tx_command(service: &LedgerService, user: Uuid, cmd: TxCommands) -> Result<()> {
    match cmd {
        TxCommands::Add {
            account,
            amount,
            transaction_type,
            description,
            observation,
            category,
            due,
            paid,
            paid_on,
        } => {
            let transaction_type: TransactionType = transaction_type.parse()?;
            let now = service.clock().now();
            let due_date = due.as_deref().map(parse_date).transpose()?.unwrap_or(now);
            let paid_at = match paid_on {
                Some(date) => Some(parse_date(&date)?),
                None if paid => Some(now),
                None => None,
            };

            let id = service
                .add_transaction_to_account(AddTransactionParams {
                    account_id: account,
                    user_id: user,
                    category_id: category,
                    transaction_type,
                    description,
                    observation,
                    amount_cents: parse_cents(&amount)?,
                    due_date,
                    paid_at,
                })
                .await?;
            println!("Added transaction: {}", id);
        }

        TxCommands::Delete { account, id } => {
            service.delete_transaction(user, account, id).await?;
            println!("Deleted transaction: {}", id);
        }

        TxCommands::Pay { account, id, date } => {
            let paid_at = date.as_deref().map(parse_date).transpose()?;
            service
                .mark_transaction_as_paid(user, account, id, paid_at)
                .await?;
            println!("Marked as paid: {}", id);
        }

        TxCommands::Unpay { account, id } => {
            service.mark_transaction_as_unpaid(user, account, id).await?;
            println!("Marked as unpaid: {}", id);
        }
    }
    Ok(())
}

async fn run_balance_command(
    service: &LedgerService,
    user: Uuid,
    format: OutputFormat,
) -> Result<()> {
    let overall = service.overall_balance(user).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&overall)?),
        OutputFormat::Table => {
            println!("Real balance:      {:>14}", format_cents(overall.real));
            println!("Projected balance: {:>14}", format_cents(overall.projected));
            println!("Accounts counted:  {:>14}", overall.accounts.len());
        }
    }
    Ok(())
}

fn print_account(view: &AccountView, account: &Account) {
    println!("Account: {}", view.name);
    println!("  ID:                {}", view.id);
    println!("  Status:            {}", status(account));
    println!(
        "  Overall balance:   {}",
        if view.include_in_overall_balance { "included" } else { "excluded" }
    );
    if let Some(archived) = view.archived_at {
        println!("  Archived:          {}", archived.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  Real balance:      {}", format_cents(view.real_balance));
    println!("  Projected balance: {}", format_cents(view.projected_balance));
    println!();

    if view.transactions.is_empty() {
        println!("No transactions.");
        return;
    }

    println!(
        "{:<36} {:<11} {:<10} {:>12} {:<10} {:<24}",
        "ID", "TYPE", "DUE", "AMOUNT", "PAID", "DESCRIPTION"
    );
    println!("{}", "-".repeat(108));
    for tx in &view.transactions {
        println!(
            "{:<36} {:<11} {:<10} {:>12} {:<10} {:<24}",
            tx.id,
            tx.transaction_type,
            tx.due_date.format("%Y-%m-%d"),
            format_cents(tx.amount_cents),
            tx.paid_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string()),
            truncate(&tx.description, 24)
        );
    }
}

fn status(account: &Account) -> &'static str {
    if account.is_archived() { "archived" } else { "active" }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Parse YYYY-MM-DD as midnight UTC.
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD format")?;
    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;
    Ok(naive_datetime.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let date = parse_date("2024-01-15").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-15T00:00:00+00:00");
        assert!(parse_date("15/01/2024").is_err());
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("Checking", 24), "Checking");
        assert_eq!(truncate("Conta poupança da família", 10), "Conta p...");
    }

    #[test]
    fn test_cli_parses_tx_add() {
        let cli = Cli::parse_from([
            "fintrack",
            "--user",
            "7e57d19c-5953-433c-9b57-d3d8e1f3b8b8",
            "tx",
            "add",
            "7e57d19c-5953-433c-9b57-d3d8e1f3b8b9",
            "-200.00",
            "--type",
            "expense",
            "--description",
            "Groceries",
            "--paid",
        ]);
        match cli.command {
            Commands::Tx(TxCommands::Add {
                amount,
                transaction_type,
                paid,
                paid_on,
                ..
            }) => {
                assert_eq!(amount, "-200.00");
                assert_eq!(transaction_type, "expense");
                assert!(paid);
                assert!(paid_on.is_none());
            }
            _ => panic!("expected tx add"),
        }
    }
}
