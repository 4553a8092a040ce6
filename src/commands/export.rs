use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::balance::load_balance;
use crate::auth::Principal;
use crate::error::{JournalError, Result};
use crate::models::{AccountBalance, Payment, PaymentFilter, PaymentStatus, Trade};
use crate::store::{JournalStore, WriteBatch};

const BACKUP_VERSION: &str = "1.0.0";

const TRADE_HEADERS: [&str; 15] = [
    "id",
    "symbol",
    "direction",
    "status",
    "entry_date",
    "exit_date",
    "entry_price",
    "exit_price",
    "quantity",
    "pnl",
    "pnl_percent",
    "balance_after",
    "strategy",
    "tags",
    "notes",
];

const PAYMENT_HEADERS: [&str; 11] = [
    "id",
    "user_id",
    "email",
    "plan",
    "amount",
    "method",
    "reference",
    "status",
    "submitted_at",
    "reviewed_at",
    "reviewed_by",
];

/// Full journal of one owner, as written by `export_backup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalBackup {
    pub version: String,
    pub export_date: String,
    pub owner_id: String,
    pub balance: Option<AccountBalance>,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub trades_imported: usize,
    pub balance: AccountBalance,
}

fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn format_amount(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| JournalError::ExportError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| JournalError::ExportError(e.to_string()))
}

/// Flatten trades to CSV, one row per trade, columns in `TRADE_HEADERS` order
pub fn trades_to_csv(trades: &[Trade]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TRADE_HEADERS)?;

    for trade in trades {
        writer.write_record([
            trade.id.clone(),
            trade.symbol.clone(),
            trade.direction.to_string(),
            trade.status.to_string(),
            format_timestamp(trade.entry_date),
            trade.exit_date.map(format_timestamp).unwrap_or_default(),
            trade.entry_price.to_string(),
            trade.exit_price.map(|p| p.to_string()).unwrap_or_default(),
            trade.quantity.to_string(),
            format_amount(trade.pnl),
            format_amount(trade.pnl_percent),
            format_amount(trade.balance_after),
            trade.strategy.clone().unwrap_or_default(),
            trade.tags.join(";"),
            trade.notes.clone(),
        ])?;
    }

    finish(writer)
}

pub fn payments_to_csv(payments: &[Payment]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PAYMENT_HEADERS)?;

    for payment in payments {
        writer.write_record([
            payment.id.clone(),
            payment.user_id.clone(),
            payment.email.clone(),
            payment.plan.to_string(),
            format_amount(Some(payment.amount)),
            payment.method.clone(),
            payment.reference.clone(),
            payment.status.to_string(),
            format_timestamp(payment.submitted_at),
            payment.reviewed_at.map(format_timestamp).unwrap_or_default(),
            payment.reviewed_by.clone().unwrap_or_default(),
        ])?;
    }

    finish(writer)
}

pub async fn export_trades_csv(store: &dyn JournalStore, owner_id: &str) -> Result<String> {
    let trades = store.list_trades(owner_id).await?;
    log::info!("Exporting {} trades for {} as CSV", trades.len(), owner_id);
    trades_to_csv(&trades)
}

pub async fn export_payments_csv(
    store: &dyn JournalStore,
    admin: &Principal,
    status: Option<PaymentStatus>,
) -> Result<String> {
    admin.require_admin()?;
    let payments = store
        .list_payments(&PaymentFilter {
            user_id: None,
            status,
        })
        .await?;
    payments_to_csv(&payments)
}

/// Export an owner's balance and trades to JSON
pub async fn export_backup(store: &dyn JournalStore, owner_id: &str) -> Result<String> {
    let (trades, balance) =
        futures::try_join!(store.list_trades(owner_id), store.get_balance(owner_id))?;

    let backup = JournalBackup {
        version: BACKUP_VERSION.to_string(),
        export_date: Utc::now().to_rfc3339(),
        owner_id: owner_id.to_string(),
        balance,
        trades,
    };

    Ok(serde_json::to_string_pretty(&backup)?)
}

/// Import a JSON backup into `owner_id`'s journal.
///
/// Trades are upserted by id and the balance is rebuilt from the merged
/// trade set, all in one batch.
pub async fn import_backup(
    store: &dyn JournalStore,
    owner_id: &str,
    json_data: &str,
) -> Result<ImportSummary> {
    let backup: JournalBackup = serde_json::from_str(json_data)?;
    let now = Utc::now().timestamp();

    let mut imported: Vec<Trade> = Vec::with_capacity(backup.trades.len());
    for mut trade in backup.trades {
        if let Some(existing) = store.get_trade(&trade.id).await? {
            if existing.owner_id != owner_id {
                return Err(JournalError::Validation(format!(
                    "Trade {} belongs to another account",
                    trade.id
                )));
            }
        }
        trade.owner_id = owner_id.to_string();
        trade.refresh_pnl();
        trade.validate().map_err(|e| {
            JournalError::Validation(format!("Trade {} in backup: {}", trade.id, e))
        })?;

        // One row per id, as the store upserts; the last copy wins
        match imported.iter_mut().find(|t| t.id == trade.id) {
            Some(earlier) => {
                log::warn!("Backup lists trade {} more than once, keeping the last", trade.id);
                *earlier = trade;
            }
            None => imported.push(trade),
        }
    }

    let mut merged: Vec<Trade> = store
        .list_trades(owner_id)
        .await?
        .into_iter()
        .filter(|t| !imported.iter().any(|i| i.id == t.id))
        .collect();
    merged.extend(imported.iter().cloned());

    let (current, _) = load_balance(store, owner_id, now).await?;
    let starting_balance = backup
        .balance
        .map(|b| b.starting_balance)
        .unwrap_or(current.starting_balance);
    let balance = current
        .with_starting_balance(starting_balance, now)?
        .recalculated(&merged, now)?;

    let trades_imported = imported.len();
    let mut batch = WriteBatch::new();
    for trade in imported {
        batch = batch.put_trade(trade);
    }
    store.commit(batch.put_balance(balance.clone())).await?;

    log::info!(
        "Imported {} trades for {}, total P&L now {:.2}",
        trades_imported,
        owner_id,
        balance.total_pnl
    );
    Ok(ImportSummary {
        trades_imported,
        balance,
    })
}
