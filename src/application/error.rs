use thiserror::Error;

use crate::domain::{Amount, ParseAmountError, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("Insufficient balance in account {user_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Amount,
        required: Amount,
    },

    #[error("Balance of account {user_id} cannot take {amount} exactly: balance {balance}")]
    BalanceOutOfRange {
        user_id: UserId,
        balance: Amount,
        amount: Amount,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(UserId),

    #[error("Invalid recipient {recipient}: {reason}")]
    InvalidRecipient {
        recipient: UserId,
        reason: &'static str,
    },

    #[error("Store unavailable: {0:#}")]
    StoreUnavailable(#[from] anyhow::Error),
}

impl From<ParseAmountError> for LedgerError {
    fn from(err: ParseAmountError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}

impl LedgerError {
    /// Validation failures are detected before anything is written.
    pub fn is_validation(&self) -> bool {
        !matches!(self, LedgerError::StoreUnavailable(_))
    }
}
