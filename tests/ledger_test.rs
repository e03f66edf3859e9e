mod common;

use anyhow::Result;
use coffer::{Amount, LedgerEngine, LedgerError, LedgerStore, TransactionKind};
use common::{amount, fund, memory_engine, sqlite_engine, total_of};

#[tokio::test]
async fn test_deposit_adds_to_balance_and_records_once() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "100.00").await?;

    let before = engine.get_balance(1).await?;
    let history_before = engine.get_history(1).await?.len();

    let receipt = engine.deposit(1, "100.50").await?;

    let after = engine.get_balance(1).await?;
    assert_eq!(after, before.checked_add(amount("100.50")).unwrap());
    assert_eq!(receipt.balance, after);
    assert_eq!(after.to_string(), "200.50");

    let history = engine.get_history(1).await?;
    assert_eq!(history.len(), history_before + 1);
    assert_eq!(history[0], receipt.record);
    assert_eq!(history[0].kind, TransactionKind::Deposit);
    assert_eq!(history[0].amount, amount("100.50"));
    assert_eq!(history[0].counterparty, None);

    Ok(())
}

#[tokio::test]
async fn test_first_deposit_opens_account() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;

    engine.deposit(7, "12.34").await?;

    assert_eq!(engine.get_balance(7).await?, amount("12.34"));
    assert_eq!(engine.list_accounts().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deposit_rejects_bad_amounts_without_side_effects() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "10.00").await?;

    assert!(matches!(
        engine.deposit(1, "-100.00").await,
        Err(LedgerError::NonPositiveAmount(_))
    ));
    assert!(matches!(
        engine.deposit(1, "0").await,
        Err(LedgerError::NonPositiveAmount(_))
    ));
    assert!(matches!(
        engine.deposit(1, "invalid").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.deposit(1, "").await,
        Err(LedgerError::InvalidAmount(_))
    ));

    assert_eq!(engine.get_balance(1).await?, amount("10.00"));
    assert_eq!(engine.get_history(1).await?.len(), 1);

    // Rejected amounts never open an account either
    assert!(matches!(
        engine.deposit(2, "-1").await,
        Err(LedgerError::NonPositiveAmount(_))
    ));
    assert!(matches!(
        engine.get_balance(2).await,
        Err(LedgerError::AccountNotFound(2))
    ));
    Ok(())
}

#[tokio::test]
async fn test_withdraw_within_balance() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "300.00").await?;

    let receipt = engine.withdraw(1, "50.00").await?;

    assert_eq!(receipt.balance, amount("250.00"));
    assert_eq!(engine.get_balance(1).await?.to_string(), "250.00");

    let history = engine.get_history(1).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Withdraw);
    assert_eq!(history[1].kind, TransactionKind::Deposit);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_entire_balance() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "42.42").await?;

    engine.withdraw(1, "42.42").await?;
    assert_eq!(engine.get_balance(1).await?, Amount::ZERO);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_more_than_balance_fails_unchanged() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "100.00").await?;

    let err = engine.withdraw(1, "100.01").await.unwrap_err();
    match err {
        LedgerError::InsufficientBalance {
            user_id,
            balance,
            required,
        } => {
            assert_eq!(user_id, 1);
            assert_eq!(balance, amount("100.00"));
            assert_eq!(required, amount("100.01"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(engine.get_balance(1).await?, amount("100.00"));
    assert_eq!(engine.get_history(1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_from_unknown_account() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;

    assert!(matches!(
        engine.withdraw(9, "1").await,
        Err(LedgerError::AccountNotFound(9))
    ));
    assert!(engine.list_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transfer_moves_money_and_conserves_total() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "1000.00").await?;
    fund(&engine, 2, "250.00").await?;

    let total_before = total_of(&engine, &[1, 2]).await?;
    let receipt = engine.transfer(1, 2, "300.00").await?;

    assert_eq!(receipt.from_balance, amount("700.00"));
    assert_eq!(receipt.to_balance, amount("550.00"));
    assert_eq!(engine.get_balance(1).await?, amount("700.00"));
    assert_eq!(engine.get_balance(2).await?, amount("550.00"));
    assert_eq!(total_of(&engine, &[1, 2]).await?, total_before);

    // One record, owned by the sender
    let sender_history = engine.get_history(1).await?;
    assert_eq!(sender_history[0], receipt.record);
    assert_eq!(sender_history[0].kind, TransactionKind::Transfer);
    assert_eq!(sender_history[0].counterparty, Some(2));

    let recipient_history = engine.get_history(2).await?;
    assert!(recipient_history
        .iter()
        .all(|r| r.kind == TransactionKind::Deposit));
    Ok(())
}

#[tokio::test]
async fn test_transfer_from_higher_to_lower_id() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "10").await?;
    fund(&engine, 2, "10").await?;

    engine.transfer(2, 1, "4").await?;

    assert_eq!(engine.get_balance(1).await?, amount("14"));
    assert_eq!(engine.get_balance(2).await?, amount("6"));
    Ok(())
}

#[tokio::test]
async fn test_transfer_insufficient_balance_leaves_both_untouched() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "50.00").await?;
    fund(&engine, 2, "5.00").await?;

    assert!(matches!(
        engine.transfer(1, 2, "50.01").await,
        Err(LedgerError::InsufficientBalance { user_id: 1, .. })
    ));

    assert_eq!(engine.get_balance(1).await?, amount("50.00"));
    assert_eq!(engine.get_balance(2).await?, amount("5.00"));
    assert_eq!(engine.get_history(1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transfer_invalid_recipients() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "50.00").await?;

    assert!(matches!(
        engine.transfer(1, 1, "1").await,
        Err(LedgerError::InvalidRecipient { recipient: 1, .. })
    ));
    assert!(matches!(
        engine.transfer(1, 99, "1").await,
        Err(LedgerError::InvalidRecipient { recipient: 99, .. })
    ));
    assert!(matches!(
        engine.transfer(1, 0, "1").await,
        Err(LedgerError::InvalidRecipient { recipient: 0, .. })
    ));

    assert_eq!(engine.get_balance(1).await?, amount("50.00"));
    assert!(matches!(
        engine.get_balance(99).await,
        Err(LedgerError::AccountNotFound(99))
    ));
    Ok(())
}

#[tokio::test]
async fn test_transfer_validates_amount_first() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;

    // Neither account exists, but the amount is checked before anything else
    assert!(matches!(
        engine.transfer(1, 2, "abc").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.transfer(1, 2, "-5").await,
        Err(LedgerError::NonPositiveAmount(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_history_empty_for_account_without_transactions() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    engine.open_account(1).await?;

    assert!(engine.get_history(1).await?.is_empty());
    assert!(engine.get_history(404).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_newest_first() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    fund(&engine, 1, "100").await?;
    engine.open_account(2).await?;

    engine.withdraw(1, "10").await?;
    engine.transfer(1, 2, "20").await?;
    engine.deposit(1, "5").await?;

    let kinds: Vec<TransactionKind> = engine
        .get_history(1)
        .await?
        .iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Deposit,
            TransactionKind::Transfer,
            TransactionKind::Withdraw,
            TransactionKind::Deposit,
        ]
    );

    let history = engine.get_history(1).await?;
    assert!(history.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    Ok(())
}

#[tokio::test]
async fn test_exact_decimal_accumulation() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;

    for _ in 0..10 {
        engine.deposit(1, "0.10").await?;
    }

    assert_eq!(engine.get_balance(1).await?, amount("1.00"));
    assert_eq!(engine.get_balance(1).await?.to_string(), "1.00");
    Ok(())
}

const LARGE: &str = "10000000000000000000000000000";

/// Balances at the edge of decimal precision: every operation either lands
/// exactly or is rejected with nothing written.
async fn precision_limit<S: LedgerStore>(engine: LedgerEngine<S>) -> Result<()> {
    fund(&engine, 1, LARGE).await?;
    fund(&engine, 2, "5").await?;

    // Debiting 0.1 from the large balance would round it back to itself
    assert!(matches!(
        engine.transfer(1, 2, "0.1").await,
        Err(LedgerError::BalanceOutOfRange { user_id: 1, .. })
    ));
    // Crediting 0.5 to it would round the fraction away
    assert!(matches!(
        engine.transfer(2, 1, "0.5").await,
        Err(LedgerError::BalanceOutOfRange { user_id: 1, .. })
    ));
    assert!(matches!(
        engine.deposit(1, "0.1").await,
        Err(LedgerError::BalanceOutOfRange { user_id: 1, .. })
    ));
    assert!(matches!(
        engine.withdraw(1, "0.1").await,
        Err(LedgerError::BalanceOutOfRange { user_id: 1, .. })
    ));

    assert_eq!(engine.get_balance(1).await?, amount(LARGE));
    assert_eq!(engine.get_balance(2).await?, amount("5"));
    assert_eq!(engine.get_history(1).await?.len(), 1);
    assert_eq!(engine.get_history(2).await?.len(), 1);

    // Whole units still move exactly and conserve the total
    let total_before = total_of(&engine, &[1, 2]).await?;
    engine.transfer(1, 2, "1").await?;
    assert_eq!(engine.get_balance(1).await?, amount("9999999999999999999999999999"));
    assert_eq!(engine.get_balance(2).await?, amount("6"));
    assert_eq!(total_of(&engine, &[1, 2]).await?, total_before);

    let report = engine.check_integrity().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    Ok(())
}

#[tokio::test]
async fn test_precision_limit_sqlite() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    precision_limit(engine).await
}

#[tokio::test]
async fn test_precision_limit_memory() -> Result<()> {
    precision_limit(memory_engine()).await
}

#[tokio::test]
async fn test_open_account_twice_fails() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    engine.open_account(3).await?;

    assert!(matches!(
        engine.open_account(3).await,
        Err(LedgerError::AccountAlreadyExists(3))
    ));
    assert_eq!(engine.get_balance(3).await?, Amount::ZERO);
    Ok(())
}

#[tokio::test]
async fn test_deposit_without_auto_open_requires_account() -> Result<()> {
    let (engine, _temp) = sqlite_engine().await?;
    let engine = engine.with_auto_open(false);

    assert!(matches!(
        engine.deposit(5, "10").await,
        Err(LedgerError::AccountNotFound(5))
    ));
    assert!(engine.list_accounts().await?.is_empty());

    engine.open_account(5).await?;
    engine.deposit(5, "10").await?;
    assert_eq!(engine.get_balance(5).await?, amount("10"));
    Ok(())
}

#[tokio::test]
async fn test_state_survives_reconnect() -> Result<()> {
    use coffer::config::StoreConfig;
    use coffer::{LedgerEngine, SqliteStore};

    let temp_dir = tempfile::TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("ledger.db"));

    {
        let engine = LedgerEngine::new(SqliteStore::init(&config).await?);
        engine.deposit(1, "99.99").await?;
    }

    let engine = LedgerEngine::new(SqliteStore::connect(&config).await?);
    assert_eq!(engine.get_balance(1).await?, amount("99.99"));
    assert_eq!(engine.get_history(1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_connect_to_missing_database_fails() -> Result<()> {
    use coffer::SqliteStore;
    use coffer::config::StoreConfig;

    let temp_dir = tempfile::TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("missing.db"));

    assert!(SqliteStore::connect(&config).await.is_err());
    Ok(())
}
