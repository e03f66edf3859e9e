use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{Account, Amount, TransactionRecord, UserId};

use super::{LedgerStore, UnitOfWork};

/// In-process ledger store with one exclusive lock per account row.
///
/// Units of work on disjoint accounts never wait for each other. Committed
/// balances are kept beside the row lock, so unlocked reads never block.
/// An account that is being opened already has its row lock, parked in
/// `opening` until the account is published, so concurrent openers queue on
/// it instead of racing to commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    accounts: RwLock<BTreeMap<UserId, Row>>,
    opening: Mutex<BTreeMap<UserId, Arc<RowLock<()>>>>,
    ledger: Mutex<Vec<TransactionRecord>>,
}

struct Row {
    lock: Arc<RowLock<()>>,
    balance: Amount,
    created_at: DateTime<Utc>,
}

impl Shared {
    fn accounts(&self) -> Result<RwLockReadGuard<'_, BTreeMap<UserId, Row>>> {
        self.accounts
            .read()
            .map_err(|_| anyhow!("Account table lock poisoned"))
    }

    fn accounts_mut(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<UserId, Row>>> {
        self.accounts
            .write()
            .map_err(|_| anyhow!("Account table lock poisoned"))
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Vec<TransactionRecord>>> {
        self.ledger.lock().map_err(|_| anyhow!("Ledger lock poisoned"))
    }

    fn opening(&self) -> Result<MutexGuard<'_, BTreeMap<UserId, Arc<RowLock<()>>>>> {
        self.opening.lock().map_err(|_| anyhow!("Opening lock table poisoned"))
    }

    /// The row lock of an account, or the one reserved for it while it does
    /// not exist yet. Lock order is `accounts` before `opening`.
    fn row_lock(&self, user_id: UserId) -> Result<Arc<RowLock<()>>> {
        let accounts = self.accounts()?;
        if let Some(row) = accounts.get(&user_id) {
            return Ok(Arc::clone(&row.lock));
        }
        let mut opening = self.opening()?;
        Ok(Arc::clone(
            opening
                .entry(user_id)
                .or_insert_with(|| Arc::new(RowLock::new(()))),
        ))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            locks: BTreeMap::new(),
            staged: BTreeMap::new(),
            inserted: BTreeMap::new(),
            records: Vec::new(),
        })
    }

    async fn create_account(&self, user_id: UserId) -> Result<bool> {
        let row_lock = self.shared.row_lock(user_id)?;
        // Waits out a unit of work that is opening the same account
        let _guard = row_lock.lock().await;

        let mut accounts = self.shared.accounts_mut()?;
        if accounts.contains_key(&user_id) {
            return Ok(false);
        }
        let account = Account::new(user_id);
        accounts.insert(
            user_id,
            Row {
                lock: Arc::clone(&row_lock),
                balance: account.balance,
                created_at: account.created_at,
            },
        );
        self.shared.opening()?.remove(&user_id);
        Ok(true)
    }

    async fn read_balance(&self, user_id: UserId) -> Result<Option<Amount>> {
        Ok(self.shared.accounts()?.get(&user_id).map(|row| row.balance))
    }

    async fn list_transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        let ledger = self.shared.ledger()?;
        // Newest first; records appended later win ties
        Ok(ledger
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .fold(Vec::new(), |mut history: Vec<TransactionRecord>, record| {
                let at = history.partition_point(|r| r.created_at >= record.created_at);
                history.insert(at, record.clone());
                history
            }))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .shared
            .accounts()?
            .iter()
            .map(|(user_id, row)| Account {
                user_id: *user_id,
                balance: row.balance,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn list_all_transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.shared.ledger()?.clone())
    }
}

/// Staged changes plus the row locks held for them. Nothing is published
/// until `commit`; dropping the unit releases its locks and discards the rest.
pub struct MemoryUnit {
    shared: Arc<Shared>,
    locks: BTreeMap<UserId, OwnedMutexGuard<()>>,
    staged: BTreeMap<UserId, Amount>,
    inserted: BTreeMap<UserId, (Arc<RowLock<()>>, DateTime<Utc>)>,
    records: Vec<TransactionRecord>,
}

impl MemoryUnit {
    fn current_balance(&self, user_id: UserId) -> Result<Option<Amount>> {
        if let Some(balance) = self.staged.get(&user_id) {
            return Ok(Some(*balance));
        }
        Ok(self.shared.accounts()?.get(&user_id).map(|row| row.balance))
    }
}

impl UnitOfWork for MemoryUnit {
    async fn lock_balance(&mut self, user_id: UserId) -> Result<Option<Amount>> {
        if self.locks.contains_key(&user_id) {
            return self.current_balance(user_id);
        }

        let row_lock = {
            let accounts = self.shared.accounts()?;
            match accounts.get(&user_id) {
                Some(row) => Arc::clone(&row.lock),
                None => return Ok(None),
            }
        };

        let guard = row_lock.lock_owned().await;
        self.locks.insert(user_id, guard);
        self.current_balance(user_id)
    }

    async fn insert_account(&mut self, user_id: UserId) -> Result<()> {
        if self.locks.contains_key(&user_id) {
            bail!("Account {} already exists", user_id);
        }

        let row_lock = self.shared.row_lock(user_id)?;
        let guard = Arc::clone(&row_lock).lock_owned().await;
        self.locks.insert(user_id, guard);

        // Another unit opened it while we waited: keep its lock, insert nothing
        if self.shared.accounts()?.contains_key(&user_id) {
            return Ok(());
        }

        let account = Account::new(user_id);
        self.staged.insert(user_id, account.balance);
        self.inserted.insert(user_id, (row_lock, account.created_at));
        Ok(())
    }

    async fn set_balance(&mut self, user_id: UserId, balance: Amount) -> Result<()> {
        if !self.locks.contains_key(&user_id) {
            bail!("Account {} is not locked by this unit of work", user_id);
        }
        self.staged.insert(user_id, balance);
        Ok(())
    }

    async fn append_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut accounts = self.shared.accounts_mut()?;

        if let Some(user_id) = self.inserted.keys().find(|&&id| accounts.contains_key(&id)) {
            bail!("Account {} was created concurrently", user_id);
        }
        if let Some(user_id) = self
            .staged
            .keys()
            .find(|&&id| !accounts.contains_key(&id) && !self.inserted.contains_key(&id))
        {
            bail!("Account {} vanished before commit", user_id);
        }

        let mut opening = self.shared.opening()?;
        for (user_id, (lock, created_at)) in &self.inserted {
            opening.remove(user_id);
            accounts.insert(
                *user_id,
                Row {
                    lock: Arc::clone(lock),
                    balance: Amount::ZERO,
                    created_at: *created_at,
                },
            );
        }
        for (user_id, balance) in &self.staged {
            if let Some(row) = accounts.get_mut(user_id) {
                row.balance = *balance;
            }
        }
        self.shared.ledger()?.extend(self.records.iter().cloned());

        // Row locks are released only after the new state is published
        drop(opening);
        drop(accounts);
        drop(self.locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
