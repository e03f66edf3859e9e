use std::collections::BTreeMap;

use serde::Serialize;

use super::{Account, Amount, TransactionKind, TransactionRecord, UserId};

/// Replay the ledger into per-account balances.
///
/// Deposits credit the owner, withdrawals debit the owner and transfers move
/// the amount from the owner to the counterparty. Returns `None` if a sum
/// overflows or cannot be held exactly.
pub fn replay_balances(records: &[TransactionRecord]) -> Option<BTreeMap<UserId, Amount>> {
    let mut balances: BTreeMap<UserId, Amount> = BTreeMap::new();

    for record in records {
        match record.kind {
            TransactionKind::Deposit => credit(&mut balances, record.user_id, record.amount)?,
            TransactionKind::Withdraw => debit(&mut balances, record.user_id, record.amount)?,
            TransactionKind::Transfer => {
                debit(&mut balances, record.user_id, record.amount)?;
                if let Some(to) = record.counterparty {
                    credit(&mut balances, to, record.amount)?;
                }
            }
        }
    }

    Some(balances)
}

fn credit(balances: &mut BTreeMap<UserId, Amount>, user_id: UserId, amount: Amount) -> Option<()> {
    let entry = balances.entry(user_id).or_insert(Amount::ZERO);
    *entry = entry.checked_add(amount)?;
    Some(())
}

fn debit(balances: &mut BTreeMap<UserId, Amount>, user_id: UserId, amount: Amount) -> Option<()> {
    let entry = balances.entry(user_id).or_insert(Amount::ZERO);
    *entry = entry.checked_sub(amount)?;
    Some(())
}

/// Stored balance that disagrees with the replayed ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub user_id: UserId,
    pub stored: Amount,
    pub replayed: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub record_count: usize,
    /// Sum of all stored balances
    pub total_balance: Amount,
    /// Total deposited minus total withdrawn
    pub net_inflow: Amount,
    pub is_balanced: bool,
    pub mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<UserId>,
    pub unknown_accounts: Vec<UserId>,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Compare stored balances against the replayed ledger.
pub fn build_integrity_report(accounts: &[Account], records: &[TransactionRecord]) -> IntegrityReport {
    let mut issues = Vec::new();

    let replayed = match replay_balances(records) {
        Some(balances) => balances,
        None => {
            issues.push("Ledger replay cannot be summed exactly".to_string());
            BTreeMap::new()
        }
    };

    let mut total_balance = Amount::ZERO;
    let mut mismatches = Vec::new();
    let mut negative_balances = Vec::new();

    for account in accounts {
        match total_balance.checked_add(account.balance) {
            Some(sum) => total_balance = sum,
            None => issues.push("Sum of balances cannot be held exactly".to_string()),
        }

        if account.balance.is_negative() {
            issues.push(format!(
                "Account {} has a negative balance: {}",
                account.user_id, account.balance
            ));
            negative_balances.push(account.user_id);
        }

        let expected = replayed.get(&account.user_id).copied().unwrap_or(Amount::ZERO);
        if expected != account.balance {
            issues.push(format!(
                "Account {} balance {} does not match ledger ({})",
                account.user_id, account.balance, expected
            ));
            mismatches.push(BalanceMismatch {
                user_id: account.user_id,
                stored: account.balance,
                replayed: expected,
            });
        }
    }

    let unknown_accounts: Vec<UserId> = replayed
        .keys()
        .filter(|id| !accounts.iter().any(|a| a.user_id == **id))
        .copied()
        .collect();
    for id in &unknown_accounts {
        issues.push(format!("Ledger references unknown account {}", id));
    }

    let mut net_inflow = Amount::ZERO;
    for record in records {
        let next = match record.kind {
            TransactionKind::Deposit => net_inflow.checked_add(record.amount),
            TransactionKind::Withdraw => net_inflow.checked_sub(record.amount),
            TransactionKind::Transfer => Some(net_inflow),
        };
        match next {
            Some(value) => net_inflow = value,
            None => {
                issues.push("Net inflow cannot be held exactly".to_string());
                break;
            }
        }
    }

    let is_balanced = total_balance == net_inflow;
    if !is_balanced {
        issues.push(format!(
            "Total balance {} differs from deposits minus withdrawals {}",
            total_balance, net_inflow
        ));
    }

    IntegrityReport {
        account_count: accounts.len(),
        record_count: records.len(),
        total_balance,
        net_inflow,
        is_balanced,
        mismatches,
        negative_balances,
        unknown_accounts,
        issues,
    }
}
