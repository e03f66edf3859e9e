use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::Amount;

/// Accounts are keyed by the owning user. The ordering of ids is the global
/// lock order for operations touching more than one account.
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account always starts at zero.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Amount::ZERO,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Order two accounts for lock acquisition: lowest id first.
pub fn lock_order(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b { (a, b) } else { (b, a) }
}
