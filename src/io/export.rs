use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::LedgerEngine;
use crate::domain::{Account, TransactionRecord, UserId};
use crate::storage::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// A user's history as written by the JSON exporter
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub user_id: UserId,
    pub exported_at: DateTime<Utc>,
    pub transactions: Vec<TransactionRecord>,
}

/// Exporter for writing ledger data out as CSV or JSON
pub struct Exporter<'a, S> {
    engine: &'a LedgerEngine<S>,
}

impl<'a, S: LedgerStore> Exporter<'a, S> {
    pub fn new(engine: &'a LedgerEngine<S>) -> Self {
        Self { engine }
    }

    /// Export one user's history, newest first. Returns the number of records written.
    pub async fn export_history<W: Write>(
        &self,
        user_id: UserId,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize> {
        let records = self.engine.get_history(user_id).await?;
        match format {
            ExportFormat::Csv => write_history_csv(&records, writer),
            ExportFormat::Json => {
                let count = records.len();
                let snapshot = HistorySnapshot {
                    user_id,
                    exported_at: Utc::now(),
                    transactions: records,
                };
                serde_json::to_writer_pretty(writer, &snapshot)?;
                Ok(count)
            }
        }
    }

    /// Export every account with its balance.
    pub async fn export_accounts<W: Write>(&self, format: ExportFormat, writer: W) -> Result<usize> {
        let accounts = self.engine.list_accounts().await?;
        match format {
            ExportFormat::Csv => write_accounts_csv(&accounts, writer),
            ExportFormat::Json => {
                serde_json::to_writer_pretty(writer, &accounts)?;
                Ok(accounts.len())
            }
        }
    }
}

fn write_history_csv<W: Write>(records: &[TransactionRecord], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(["id", "created_at", "kind", "amount", "counterparty"])?;
    for record in records {
        csv_writer.write_record(&[
            record.id.to_string(),
            record.created_at.to_rfc3339(),
            record.kind.as_str().to_string(),
            record.amount.to_string(),
            record
                .counterparty
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(records.len())
}

fn write_accounts_csv<W: Write>(accounts: &[Account], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(["user_id", "balance", "created_at"])?;
    for account in accounts {
        csv_writer.write_record(&[
            account.user_id.to_string(),
            account.balance.to_string(),
            account.created_at.to_rfc3339(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(accounts.len())
}
