use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::domain::{Account, Amount, TransactionKind, TransactionRecord, UserId};

use super::{LedgerStore, MIGRATION_001_INITIAL, UnitOfWork};

/// Ledger store backed by a SQLite database.
///
/// SQLite has no row locks: the first write of a unit of work takes the
/// database write lock, which serialises all units that mutate balances.
/// Locking is done with a no-op `UPDATE`, so every unit starts by asking for
/// the write lock and waits for it (up to the busy timeout) rather than
/// reading a snapshot it could not later upgrade.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to connect to database {}", config.database.display())
            })?;

        debug!(
            database = %config.database.display(),
            max_connections = config.max_connections,
            "connected to ledger database"
        );
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        debug!("ledger schema is up to date");
        Ok(())
    }

    /// Initialize a database (create if missing + connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let config = config.clone().with_create_if_missing(true);
        let store = Self::connect(&config).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let balance: String = row.get("balance");
        let created_at: String = row.get("created_at");

        Ok(Account {
            user_id: row.get("user_id"),
            balance: decode_amount(&balance)?,
            created_at: decode_timestamp(&created_at)?,
        })
    }

    fn row_to_record(row: &SqliteRow) -> Result<TransactionRecord> {
        let id: String = row.get("id");
        let kind: String = row.get("kind");
        let amount: String = row.get("amount");
        let created_at: String = row.get("created_at");

        Ok(TransactionRecord {
            id: Uuid::parse_str(&id).context("Invalid transaction ID")?,
            user_id: row.get("user_id"),
            kind: TransactionKind::from_str(&kind)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind))?,
            amount: decode_amount(&amount)?,
            counterparty: row.get("counterparty_id"),
            created_at: decode_timestamp(&created_at)?,
        })
    }
}

fn decode_amount(text: &str) -> Result<Amount> {
    Amount::parse(text).with_context(|| format!("Invalid stored amount: {}", text))
}

fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    // Fixed width, so text order is time order
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid timestamp: {}", text))?
        .with_timezone(&Utc))
}

impl LedgerStore for SqliteStore {
    type Unit = SqliteUnit;

    async fn begin(&self) -> Result<SqliteUnit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin unit of work")?;
        Ok(SqliteUnit { tx })
    }

    async fn create_account(&self, user_id: UserId) -> Result<bool> {
        let account = Account::new(user_id);
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, balance, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(account.user_id)
        .bind(account.balance.to_string())
        .bind(encode_timestamp(account.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to create account")?;

        Ok(result.rows_affected() == 1)
    }

    async fn read_balance(&self, user_id: UserId) -> Result<Option<Amount>> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read balance")?;

        row.map(|row| decode_amount(&row.get::<String, _>("balance")))
            .transpose()
    }

    async fn list_transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, kind, amount, counterparty_id, created_at
            FROM transactions
            WHERE user_id = ?
            ORDER BY created_at DESC, sequence DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT user_id, balance, created_at FROM accounts ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn list_all_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, kind, amount, counterparty_id, created_at
            FROM transactions
            ORDER BY sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger")?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

/// A SQLite transaction. Dropping it without committing rolls it back.
pub struct SqliteUnit {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork for SqliteUnit {
    async fn lock_balance(&mut self, user_id: UserId) -> Result<Option<Amount>> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance
            WHERE user_id = ?
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to lock balance")?;

        row.map(|row| decode_amount(&row.get::<String, _>("balance")))
            .transpose()
    }

    async fn insert_account(&mut self, user_id: UserId) -> Result<()> {
        let account = Account::new(user_id);
        sqlx::query("INSERT INTO accounts (user_id, balance, created_at) VALUES (?, ?, ?)")
            .bind(account.user_id)
            .bind(account.balance.to_string())
            .bind(encode_timestamp(account.created_at))
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert account")?;
        Ok(())
    }

    async fn set_balance(&mut self, user_id: UserId, balance: Amount) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET balance = ? WHERE user_id = ?")
            .bind(balance.to_string())
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update balance")?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Balance update for account {} matched no row", user_id);
        }
        Ok(())
    }

    async fn append_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, user_id, kind, amount, counterparty_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id)
        .bind(record.kind.as_str())
        .bind(record.amount.to_string())
        .bind(record.counterparty)
        .bind(encode_timestamp(record.created_at))
        .execute(&mut *self.tx)
        .await
        .context("Failed to append transaction")?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit unit of work")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back unit of work")
    }
}
