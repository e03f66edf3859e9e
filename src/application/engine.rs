use tracing::{debug, info, warn};

use crate::domain::{
    Account, Amount, IntegrityReport, TransactionRecord, UserId, build_integrity_report, lock_order,
};
use crate::storage::{LedgerStore, UnitOfWork};

use super::LedgerError;

/// The ledger transaction engine.
///
/// Every mutating operation is one unit of work: balances are read under the
/// account's exclusive lock, written, and paired with exactly one transaction
/// record before commit. Any failure rolls the whole unit back. The engine
/// holds no balance state of its own, so it can be shared freely between
/// concurrent callers.
pub struct LedgerEngine<S> {
    store: S,
    auto_open: bool,
}

/// Result of a deposit or withdrawal
#[derive(Debug, Clone)]
pub struct Receipt {
    pub record: TransactionRecord,
    /// Balance after the operation
    pub balance: Amount,
}

/// Result of a transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub record: TransactionRecord,
    pub from_balance: Amount,
    pub to_balance: Amount,
}

/// Progress of a unit of work. Only `Started`, `Committed` and `RolledBack`
/// are observable from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Started,
    Locked,
    Validated,
    Mutated,
    Recorded,
    Committed,
    RolledBack,
}

/// A unit of work plus the phase it has reached.
struct Operation<U> {
    name: &'static str,
    unit: U,
    phase: Phase,
}

impl<U: UnitOfWork> Operation<U> {
    fn advance(&mut self, next: Phase) {
        if next > self.phase {
            debug!(operation = self.name, from = ?self.phase, to = ?next, "phase");
            self.phase = next;
        }
    }

    async fn lock(&mut self, user_id: UserId) -> Result<Option<Amount>, LedgerError> {
        let balance = self.unit.lock_balance(user_id).await?;
        if balance.is_some() {
            self.advance(Phase::Locked);
        }
        Ok(balance)
    }

    /// Create the account inside this unit and hold its lock.
    async fn open(&mut self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.unit.insert_account(user_id).await?;
        self.lock(user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn validated(&mut self) {
        self.advance(Phase::Validated);
    }

    async fn set_balance(&mut self, user_id: UserId, balance: Amount) -> Result<(), LedgerError> {
        debug_assert!(self.phase >= Phase::Validated, "mutation before validation");
        debug_assert!(!balance.is_negative(), "negative balance staged");
        self.unit.set_balance(user_id, balance).await?;
        self.advance(Phase::Mutated);
        Ok(())
    }

    async fn record(&mut self, record: &TransactionRecord) -> Result<(), LedgerError> {
        debug_assert_eq!(self.phase, Phase::Mutated, "record without a balance change");
        self.unit.append_transaction(record).await?;
        self.advance(Phase::Recorded);
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        debug_assert_eq!(self.phase, Phase::Recorded, "commit of an unfinished unit");
        let name = self.name;
        self.unit.commit().await?;
        debug!(operation = name, phase = ?Phase::Committed, "phase");
        Ok(())
    }

    async fn rollback(self, error: &LedgerError) {
        let (name, reached) = (self.name, self.phase);
        if let Err(rollback_error) = self.unit.rollback().await {
            // The store discards the unit anyway once the handle is gone
            warn!(operation = name, error = %rollback_error, "rollback failed");
        }
        if error.is_validation() {
            debug!(operation = name, phase = ?reached, to = ?Phase::RolledBack, %error, "rolled back");
        } else {
            warn!(operation = name, phase = ?reached, to = ?Phase::RolledBack, %error, "rolled back");
        }
    }
}

/// Parse request text into an amount that may be applied to a balance.
fn parse_positive(amount: &str) -> Result<Amount, LedgerError> {
    let amount = Amount::parse(amount)?;
    if !amount.is_positive() {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    Ok(amount)
}

/// The new balance would overflow or need more than 28 significant digits.
fn out_of_range(user_id: UserId, balance: Amount, amount: Amount) -> LedgerError {
    LedgerError::BalanceOutOfRange {
        user_id,
        balance,
        amount,
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create an engine over the given store. Deposits open missing accounts.
    pub fn new(store: S) -> Self {
        Self {
            store,
            auto_open: true,
        }
    }

    /// Whether a deposit to a missing account opens it (default) or fails
    /// with `AccountNotFound`.
    pub fn with_auto_open(mut self, enabled: bool) -> Self {
        self.auto_open = enabled;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn start(&self, name: &'static str) -> Result<Operation<S::Unit>, LedgerError> {
        let unit = self.store.begin().await?;
        debug!(operation = name, phase = ?Phase::Started, "phase");
        Ok(Operation {
            name,
            unit,
            phase: Phase::Started,
        })
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account with a zero balance.
    pub async fn open_account(&self, user_id: UserId) -> Result<(), LedgerError> {
        if !self.store.create_account(user_id).await? {
            return Err(LedgerError::AccountAlreadyExists(user_id));
        }
        info!(user_id, "account opened");
        Ok(())
    }

    /// Current balance, read without taking the account lock.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.store
            .read_balance(user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// Transactions owned by the user, newest first. Empty if there are none.
    pub async fn get_history(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.store.list_transactions(user_id).await?)
    }

    /// All accounts, ascending by user id.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_accounts().await?)
    }

    // ========================
    // Balance-changing operations
    // ========================

    pub async fn deposit(&self, user_id: UserId, amount: &str) -> Result<Receipt, LedgerError> {
        let amount = parse_positive(amount)?;
        let mut op = self.start("deposit").await?;

        match self.apply_deposit(&mut op, user_id, amount).await {
            Ok(receipt) => {
                op.commit().await?;
                info!(user_id, amount = %amount, balance = %receipt.balance, "deposit committed");
                Ok(receipt)
            }
            Err(err) => {
                op.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn apply_deposit(
        &self,
        op: &mut Operation<S::Unit>,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        let balance = match op.lock(user_id).await? {
            Some(balance) => balance,
            None if self.auto_open => {
                debug!(user_id, "opening account on first deposit");
                op.open(user_id).await?
            }
            None => return Err(LedgerError::AccountNotFound(user_id)),
        };

        let new_balance = balance
            .checked_add(amount)
            .ok_or_else(|| out_of_range(user_id, balance, amount))?;
        op.validated();

        op.set_balance(user_id, new_balance).await?;
        let record = TransactionRecord::deposit(user_id, amount);
        op.record(&record).await?;

        Ok(Receipt {
            record,
            balance: new_balance,
        })
    }

    pub async fn withdraw(&self, user_id: UserId, amount: &str) -> Result<Receipt, LedgerError> {
        let amount = parse_positive(amount)?;
        let mut op = self.start("withdraw").await?;

        match self.apply_withdraw(&mut op, user_id, amount).await {
            Ok(receipt) => {
                op.commit().await?;
                info!(user_id, amount = %amount, balance = %receipt.balance, "withdrawal committed");
                Ok(receipt)
            }
            Err(err) => {
                op.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn apply_withdraw(
        &self,
        op: &mut Operation<S::Unit>,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        let balance = op
            .lock(user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                user_id,
                balance,
                required: amount,
            });
        }
        let new_balance = balance
            .checked_sub(amount)
            .ok_or_else(|| out_of_range(user_id, balance, amount))?;
        op.validated();

        op.set_balance(user_id, new_balance).await?;
        let record = TransactionRecord::withdraw(user_id, amount);
        op.record(&record).await?;

        Ok(Receipt {
            record,
            balance: new_balance,
        })
    }

    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let amount = parse_positive(amount)?;
        if from == to {
            return Err(LedgerError::InvalidRecipient {
                recipient: to,
                reason: "cannot transfer to the sending account",
            });
        }
        let mut op = self.start("transfer").await?;

        match self.apply_transfer(&mut op, from, to, amount).await {
            Ok(receipt) => {
                op.commit().await?;
                info!(
                    from,
                    to,
                    amount = %amount,
                    from_balance = %receipt.from_balance,
                    to_balance = %receipt.to_balance,
                    "transfer committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                op.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn apply_transfer(
        &self,
        op: &mut Operation<S::Unit>,
        from: UserId,
        to: UserId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        // Locks are always taken lowest user id first, whatever the direction
        // of the transfer. In caller order, concurrent A->B and B->A transfers
        // can each hold one lock while waiting for the other.
        let (first, second) = lock_order(from, to);
        let first_balance = Self::lock_party(op, first, to).await?;
        let second_balance = Self::lock_party(op, second, to).await?;
        let (from_balance, to_balance) = if first == from {
            (first_balance, second_balance)
        } else {
            (second_balance, first_balance)
        };

        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                user_id: from,
                balance: from_balance,
                required: amount,
            });
        }
        let new_from = from_balance
            .checked_sub(amount)
            .ok_or_else(|| out_of_range(from, from_balance, amount))?;
        let new_to = to_balance
            .checked_add(amount)
            .ok_or_else(|| out_of_range(to, to_balance, amount))?;
        op.validated();

        op.set_balance(from, new_from).await?;
        op.set_balance(to, new_to).await?;
        let record = TransactionRecord::transfer(from, to, amount);
        op.record(&record).await?;

        Ok(TransferReceipt {
            record,
            from_balance: new_from,
            to_balance: new_to,
        })
    }

    async fn lock_party(
        op: &mut Operation<S::Unit>,
        user_id: UserId,
        recipient: UserId,
    ) -> Result<Amount, LedgerError> {
        match op.lock(user_id).await? {
            Some(balance) => Ok(balance),
            None if user_id == recipient => Err(LedgerError::InvalidRecipient {
                recipient,
                reason: "account does not exist",
            }),
            None => Err(LedgerError::AccountNotFound(user_id)),
        }
    }

    // ========================
    // Integrity
    // ========================

    /// Replay the ledger and compare it with the stored balances.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let accounts = self.store.list_accounts().await?;
        let records = self.store.list_all_transactions().await?;

        let report = build_integrity_report(&accounts, &records);
        for issue in &report.issues {
            warn!(%issue, "ledger integrity issue");
        }
        Ok(report)
    }
}
