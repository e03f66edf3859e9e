//! The transactional store the ledger engine drives.
//!
//! A store hands out units of work. Everything done through a unit is
//! invisible to others until `commit`, and discarded by `rollback` or by
//! dropping the unit. `lock_balance` takes the account's exclusive lock for
//! the rest of the unit; a second unit asking for the same account waits.

use std::future::Future;

use anyhow::Result;

use crate::domain::{Account, Amount, TransactionRecord, UserId};

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Start a unit of work.
    fn begin(&self) -> impl Future<Output = Result<Self::Unit>> + Send;

    /// Insert an account with a zero balance. Returns `false` if it already exists.
    fn create_account(&self, user_id: UserId) -> impl Future<Output = Result<bool>> + Send;

    /// Read a balance without taking a lock.
    fn read_balance(&self, user_id: UserId) -> impl Future<Output = Result<Option<Amount>>> + Send;

    /// Records owned by the user, newest first.
    fn list_transactions(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<TransactionRecord>>> + Send;

    /// All accounts, ascending by user id.
    fn list_accounts(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    /// The whole ledger in append order.
    fn list_all_transactions(&self) -> impl Future<Output = Result<Vec<TransactionRecord>>> + Send;
}

pub trait UnitOfWork: Send {
    /// Lock the account's balance row and return its balance, or `None` if
    /// the account does not exist. Blocks until the lock is granted.
    fn lock_balance(&mut self, user_id: UserId) -> impl Future<Output = Result<Option<Amount>>> + Send;

    /// Create the account with a zero balance inside this unit of work and
    /// hold its lock. If a concurrent unit opened it first, waits for that
    /// unit and ends up holding the existing account's lock instead.
    fn insert_account(&mut self, user_id: UserId) -> impl Future<Output = Result<()>> + Send;

    /// Stage a new balance. The account must be locked by this unit.
    fn set_balance(&mut self, user_id: UserId, balance: Amount) -> impl Future<Output = Result<()>> + Send;

    fn append_transaction(
        &mut self,
        record: &TransactionRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
