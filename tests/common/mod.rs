// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use coffer::config::StoreConfig;
use coffer::{Amount, LedgerEngine, LedgerStore, MemoryStore, SqliteStore, UserId};
use tempfile::TempDir;

/// Helper to create an engine over a temporary SQLite database
pub async fn sqlite_engine() -> Result<(LedgerEngine<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"))
        .with_busy_timeout(Duration::from_secs(30));
    let store = SqliteStore::init(&config).await?;
    Ok((LedgerEngine::new(store), temp_dir))
}

/// Helper to create an engine over the in-memory store
pub fn memory_engine() -> LedgerEngine<MemoryStore> {
    LedgerEngine::new(MemoryStore::new())
}

/// Helper to parse a literal amount
pub fn amount(s: &str) -> Amount {
    Amount::parse(s).unwrap()
}

/// Open an account and deposit an initial balance
pub async fn fund<S: LedgerStore>(engine: &LedgerEngine<S>, user: UserId, initial: &str) -> Result<()> {
    engine.open_account(user).await?;
    engine.deposit(user, initial).await?;
    Ok(())
}

/// Sum of the balances of the given accounts
pub async fn total_of<S: LedgerStore>(engine: &LedgerEngine<S>, users: &[UserId]) -> Result<Amount> {
    let mut total = Amount::ZERO;
    for user in users {
        total = total.checked_add(engine.get_balance(*user).await?).unwrap();
    }
    Ok(total)
}
