use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, UserId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdraw" => Some(TransactionKind::Withdraw),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the ledger. Records are immutable and append-only; every
/// balance change is written together with exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Account whose operation this is (the sender, for transfers)
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Always positive
    pub amount: Amount,
    /// Receiving account, only set for transfers
    pub counterparty: Option<UserId>,
    /// Microsecond precision, so the value survives a round trip through storage
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    fn new(user_id: UserId, kind: TransactionKind, amount: Amount, counterparty: Option<UserId>) -> Self {
        assert!(amount.is_positive(), "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            counterparty,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn deposit(user_id: UserId, amount: Amount) -> Self {
        Self::new(user_id, TransactionKind::Deposit, amount, None)
    }

    pub fn withdraw(user_id: UserId, amount: Amount) -> Self {
        Self::new(user_id, TransactionKind::Withdraw, amount, None)
    }

    pub fn transfer(from: UserId, to: UserId, amount: Amount) -> Self {
        Self::new(from, TransactionKind::Transfer, amount, Some(to))
    }
}
