use std::fs::File;
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::application::{LedgerEngine, LedgerError};
use crate::config::{DEFAULT_DATABASE, DEFAULT_MAX_CONNECTIONS, StoreConfig};
use crate::domain::{TransactionKind, UserId};
use crate::io::{ExportFormat, Exporter};
use crate::storage::SqliteStore;

/// Coffer - transactional wallet ledger
#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Deposits, withdrawals and transfers over a local transactional ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "COFFER_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, env = "COFFER_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// How long to wait for a locked account, in milliseconds
    #[arg(long, env = "COFFER_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Reject deposits to accounts that were never opened
    #[arg(long, global = true)]
    pub no_auto_open: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open an account with a zero balance
    Open {
        /// User ID
        user: UserId,
    },

    /// Deposit money into an account
    Deposit {
        /// User ID
        user: UserId,

        /// Amount to deposit (e.g., "50.00" or "50")
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },

    /// Withdraw money from an account
    Withdraw {
        /// User ID
        user: UserId,

        /// Amount to withdraw
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },

    /// Transfer money between accounts
    Transfer {
        /// Amount to transfer
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Sending user ID
        #[arg(long)]
        from: UserId,

        /// Receiving user ID
        #[arg(long)]
        to: UserId,
    },

    /// Show the balance of an account
    Balance {
        /// User ID
        user: UserId,
    },

    /// Show the transaction history of an account, newest first
    History {
        /// User ID
        user: UserId,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List all accounts with their balances
    Accounts {
        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Verify that stored balances match the ledger
    Check,
}

/// Install the log subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<LedgerError>() {
        Some(LedgerError::InvalidAmount(_)) | Some(LedgerError::NonPositiveAmount(_)) => 2,
        Some(LedgerError::InsufficientBalance { .. }) => 3,
        Some(LedgerError::AccountNotFound(_)) => 4,
        Some(LedgerError::AccountAlreadyExists(_)) => 5,
        Some(LedgerError::InvalidRecipient { .. }) => 6,
        Some(LedgerError::BalanceOutOfRange { .. }) => 7,
        // EX_TEMPFAIL: the caller may retry
        Some(LedgerError::StoreUnavailable(_)) => 75,
        None => 1,
    }
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    async fn engine(&self) -> Result<LedgerEngine<SqliteStore>> {
        let store = SqliteStore::connect(&self.store_config())
            .await
            .with_context(|| {
                format!(
                    "Cannot open {} (run `coffer init` first)",
                    self.database.display()
                )
            })?;
        Ok(LedgerEngine::new(store).with_auto_open(!self.no_auto_open))
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Commands::Init => {
                SqliteStore::init(&self.store_config()).await?;
                println!("Database initialized: {}", self.database.display());
            }

            Commands::Open { user } => {
                let engine = self.engine().await?;
                engine.open_account(*user).await?;
                println!("Opened account {}", user);
            }

            Commands::Deposit { user, amount } => {
                let engine = self.engine().await?;
                let receipt = engine.deposit(*user, amount).await?;
                println!(
                    "Deposited {} into {} (balance {}) ({})",
                    receipt.record.amount, user, receipt.balance, receipt.record.id
                );
            }

            Commands::Withdraw { user, amount } => {
                let engine = self.engine().await?;
                let receipt = engine.withdraw(*user, amount).await?;
                println!(
                    "Withdrew {} from {} (balance {}) ({})",
                    receipt.record.amount, user, receipt.balance, receipt.record.id
                );
            }

            Commands::Transfer { amount, from, to } => {
                let engine = self.engine().await?;
                let receipt = engine.transfer(*from, *to, amount).await?;
                println!(
                    "Transferred {} {} -> {} ({})",
                    receipt.record.amount, from, to, receipt.record.id
                );
                println!("  {}: {}", from, receipt.from_balance);
                println!("  {}: {}", to, receipt.to_balance);
            }

            Commands::Balance { user } => {
                let engine = self.engine().await?;
                let balance = engine.get_balance(*user).await?;
                println!("{}: {}", user, balance);
            }

            Commands::History {
                user,
                format,
                output,
            } => {
                let engine = self.engine().await?;
                run_history_command(&engine, *user, format, output.as_deref()).await?;
            }

            Commands::Accounts { format } => {
                let engine = self.engine().await?;
                run_accounts_command(&engine, format).await?;
            }

            Commands::Check => {
                let engine = self.engine().await?;
                run_check_command(&engine).await?;
            }
        }

        Ok(())
    }
}

fn parse_format(format: &str) -> Result<Option<ExportFormat>> {
    if format.eq_ignore_ascii_case("table") {
        return Ok(None);
    }
    ExportFormat::from_str(format)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("Unknown format '{}'. Use table, csv or json", format))
}

async fn run_history_command(
    engine: &LedgerEngine<SqliteStore>,
    user: UserId,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(stdout()),
    };

    match parse_format(format)? {
        Some(export_format) => {
            let count = Exporter::new(engine)
                .export_history(user, export_format, writer)
                .await?;
            if let Some(path) = output {
                eprintln!("Exported {} transaction(s) to {}", count, path.display());
            }
        }
        None => {
            let records = engine.get_history(user).await?;
            let mut writer = writer;
            if records.is_empty() {
                writeln!(writer, "No transactions found.")?;
                return Ok(());
            }

            writeln!(
                writer,
                "{:<20} {:<9} {:>14} {:<12} ID",
                "DATE", "KIND", "AMOUNT", "COUNTERPARTY"
            )?;
            writeln!(writer, "{}", "-".repeat(94))?;
            for record in &records {
                let counterparty = match (record.kind, record.counterparty) {
                    (TransactionKind::Transfer, Some(to)) => format!("-> {}", to),
                    _ => String::new(),
                };
                writeln!(
                    writer,
                    "{:<20} {:<9} {:>14} {:<12} {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.kind,
                    record.amount.to_string(),
                    counterparty,
                    record.id
                )?;
            }
        }
    }
    Ok(())
}

async fn run_accounts_command(engine: &LedgerEngine<SqliteStore>, format: &str) -> Result<()> {
    if let Some(export_format) = parse_format(format)? {
        Exporter::new(engine)
            .export_accounts(export_format, stdout())
            .await?;
        return Ok(());
    }

    let accounts = engine.list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts found.");
    } else {
        println!("{:<12} {:>16}  OPENED", "USER", "BALANCE");
        println!("{}", "-".repeat(50));
        for account in accounts {
            println!(
                "{:<12} {:>16}  {}",
                account.user_id,
                account.balance.to_string(),
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

async fn run_check_command(engine: &LedgerEngine<SqliteStore>) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = engine.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.record_count);
    println!();
    println!("  {:<24} {:>16}", "Total balance:", report.total_balance.to_string());
    println!(
        "  {:<24} {:>16}  {}",
        "Deposits - withdrawals:",
        report.net_inflow.to_string(),
        if report.is_balanced { "OK" } else { "UNBALANCED!" }
    );
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}
