use std::path::Path;
use std::sync::MutexGuard;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;

use super::notify::Subscriptions;
use super::{JournalStore, StoreBackend, WriteBatch, WriteOp};
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{AccountBalance, Payment, PaymentFilter, Trade, UserProfile};

const TRADE_COLUMNS: &str = "id, owner_id, symbol, direction, entry_price, exit_price, quantity,
    entry_date, exit_date, status, pnl, pnl_percent, notes, tags, strategy, balance_after,
    created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, user_id, email, plan, amount, method, reference, status,
    submitted_at, reviewed_at, reviewed_by, rejection_reason";

const USER_COLUMNS: &str =
    "uid, email, display_name, role, plan, subscription_expires_at, created_at, updated_at";

/// Parse a TEXT column through `FromStr`, surfacing bad values as conversion errors
fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = JournalError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Helper function to map a database row to a Trade struct
fn map_row_to_trade(row: &Row) -> rusqlite::Result<Trade> {
    let tags: String = row.get(13)?;
    Ok(Trade {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        symbol: row.get(2)?,
        direction: parse_column(row, 3)?,
        entry_price: row.get(4)?,
        exit_price: row.get(5)?,
        quantity: row.get(6)?,
        entry_date: row.get(7)?,
        exit_date: row.get(8)?,
        status: parse_column(row, 9)?,
        pnl: row.get(10)?,
        pnl_percent: row.get(11)?,
        notes: row.get(12)?,
        tags: serde_json::from_str(&tags).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
        })?,
        strategy: row.get(14)?,
        balance_after: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn map_row_to_balance(row: &Row) -> rusqlite::Result<AccountBalance> {
    Ok(AccountBalance {
        owner_id: row.get(0)?,
        starting_balance: row.get(1)?,
        current_balance: row.get(2)?,
        total_pnl: row.get(3)?,
        total_return_percent: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_row_to_payment(row: &Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        plan: parse_column(row, 3)?,
        amount: row.get(4)?,
        method: row.get(5)?,
        reference: row.get(6)?,
        status: parse_column(row, 7)?,
        submitted_at: row.get(8)?,
        reviewed_at: row.get(9)?,
        reviewed_by: row.get(10)?,
        rejection_reason: row.get(11)?,
    })
}

fn map_row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        uid: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        role: parse_column(row, 3)?,
        plan: parse_column(row, 4)?,
        subscription_expires_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn query_trades(conn: &Connection, owner_id: &str) -> Result<Vec<Trade>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM trades WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
        TRADE_COLUMNS
    ))?;
    let trades = stmt
        .query_map([owner_id], map_row_to_trade)?
        .collect::<rusqlite::Result<Vec<Trade>>>()?;
    Ok(trades)
}

fn query_balance(conn: &Connection, owner_id: &str) -> Result<Option<AccountBalance>> {
    let balance = conn
        .query_row(
            "SELECT owner_id, starting_balance, current_balance, total_pnl,
                    total_return_percent, updated_at
             FROM account_balances WHERE owner_id = ?",
            [owner_id],
            map_row_to_balance,
        )
        .optional()?;
    Ok(balance)
}

fn execute_op(conn: &Connection, op: &WriteOp) -> Result<()> {
    match op {
        WriteOp::PutTrade(trade) => {
            // Upsert keeps the rowid, which breaks created_at ties
            conn.execute(
                "INSERT INTO trades (
                    id, owner_id, symbol, direction, entry_price, exit_price, quantity,
                    entry_date, exit_date, status, pnl, pnl_percent, notes, tags, strategy,
                    balance_after, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    symbol = excluded.symbol,
                    direction = excluded.direction,
                    entry_price = excluded.entry_price,
                    exit_price = excluded.exit_price,
                    quantity = excluded.quantity,
                    entry_date = excluded.entry_date,
                    exit_date = excluded.exit_date,
                    status = excluded.status,
                    pnl = excluded.pnl,
                    pnl_percent = excluded.pnl_percent,
                    notes = excluded.notes,
                    tags = excluded.tags,
                    strategy = excluded.strategy,
                    balance_after = excluded.balance_after,
                    updated_at = excluded.updated_at",
                params![
                    trade.id,
                    trade.owner_id,
                    trade.symbol,
                    trade.direction.as_str(),
                    trade.entry_price,
                    trade.exit_price,
                    trade.quantity,
                    trade.entry_date,
                    trade.exit_date,
                    trade.status.as_str(),
                    trade.pnl,
                    trade.pnl_percent,
                    trade.notes,
                    serde_json::to_string(&trade.tags)?,
                    trade.strategy,
                    trade.balance_after,
                    trade.created_at,
                    trade.updated_at,
                ],
            )?;
        }
        WriteOp::DeleteTrade { owner_id, id } => {
            let deleted = conn.execute(
                "DELETE FROM trades WHERE id = ? AND owner_id = ?",
                params![id, owner_id],
            )?;
            if deleted == 0 {
                return Err(JournalError::NotFound(format!("Trade {}", id)));
            }
        }
        WriteOp::PutBalance(balance) => {
            conn.execute(
                "INSERT INTO account_balances (
                    owner_id, starting_balance, current_balance, total_pnl,
                    total_return_percent, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(owner_id) DO UPDATE SET
                    starting_balance = excluded.starting_balance,
                    current_balance = excluded.current_balance,
                    total_pnl = excluded.total_pnl,
                    total_return_percent = excluded.total_return_percent,
                    updated_at = excluded.updated_at",
                params![
                    balance.owner_id,
                    balance.starting_balance,
                    balance.current_balance,
                    balance.total_pnl,
                    balance.total_return_percent,
                    balance.updated_at,
                ],
            )?;
        }
        WriteOp::PutPayment(payment) => {
            conn.execute(
                "REPLACE INTO payments (
                    id, user_id, email, plan, amount, method, reference, status,
                    submitted_at, reviewed_at, reviewed_by, rejection_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    payment.id,
                    payment.user_id,
                    payment.email,
                    payment.plan.as_str(),
                    payment.amount,
                    payment.method,
                    payment.reference,
                    payment.status.as_str(),
                    payment.submitted_at,
                    payment.reviewed_at,
                    payment.reviewed_by,
                    payment.rejection_reason,
                ],
            )?;
        }
        WriteOp::PutUser(user) => {
            conn.execute(
                "REPLACE INTO users (
                    uid, email, display_name, role, plan, subscription_expires_at,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    user.uid,
                    user.email,
                    user.display_name,
                    user.role.as_str(),
                    user.plan.as_str(),
                    user.subscription_expires_at,
                    user.created_at,
                    user.updated_at,
                ],
            )?;
        }
    }
    Ok(())
}

/// Persistent journal store on SQLite. Every batch is one transaction.
pub struct SqliteStore {
    db: Database,
    subscriptions: Subscriptions,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db_path = path
            .to_str()
            .ok_or_else(|| JournalError::ConfigError(format!("Invalid path: {}", path.display())))?;
        Ok(Self::from_database(Database::new(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            subscriptions: Subscriptions::new(),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .conn
            .lock()
            .map_err(|e| JournalError::Unavailable(format!("Database lock poisoned: {}", e)))
    }
}

#[async_trait]
impl JournalStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn list_trades(&self, owner_id: &str) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        query_trades(&conn, owner_id)
    }

    async fn get_trade(&self, id: &str) -> Result<Option<Trade>> {
        let conn = self.conn()?;
        let trade = conn
            .query_row(
                &format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLUMNS),
                [id],
                map_row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }

    async fn get_balance(&self, owner_id: &str) -> Result<Option<AccountBalance>> {
        let conn = self.conn()?;
        query_balance(&conn, owner_id)
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>> {
        let conn = self.conn()?;
        let payment = conn
            .query_row(
                &format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLUMNS),
                [id],
                map_row_to_payment,
            )
            .optional()?;
        Ok(payment)
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let conn = self.conn()?;

        let mut query = format!("SELECT {} FROM payments WHERE 1=1", PAYMENT_COLUMNS);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user_id) = &filter.user_id {
            query.push_str(" AND user_id = ?");
            values.push(Box::new(user_id.clone()));
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            values.push(Box::new(status.as_str()));
        }
        query.push_str(" ORDER BY submitted_at DESC, rowid DESC");

        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&query)?;
        let payments = stmt
            .query_map(params.as_slice(), map_row_to_payment)?
            .collect::<rusqlite::Result<Vec<Payment>>>()?;
        Ok(payments)
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE uid = ?", USER_COLUMNS),
                [uid],
                map_row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC, uid ASC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], map_row_to_user)?
            .collect::<rusqlite::Result<Vec<UserProfile>>>()?;
        Ok(users)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        {
            // Dropping the transaction without commit rolls every op back
            let tx = conn.unchecked_transaction()?;
            for op in batch.ops() {
                if let Err(e) = execute_op(&tx, op) {
                    log::warn!("Rolling back batch of {} writes: {}", batch.len(), e);
                    return Err(e);
                }
            }
            tx.commit()?;
        }

        for owner_id in batch.trade_owners() {
            self.subscriptions
                .publish_trades(&owner_id, || query_trades(&conn, &owner_id))?;
        }
        for owner_id in batch.balance_owners() {
            self.subscriptions
                .publish_balance(&owner_id, query_balance(&conn, &owner_id)?)?;
        }

        Ok(())
    }

    async fn subscribe_trades(&self, owner_id: &str) -> Result<watch::Receiver<Vec<Trade>>> {
        let conn = self.conn()?;
        self.subscriptions
            .trades_receiver(owner_id, || query_trades(&conn, owner_id))
    }

    async fn subscribe_balance(
        &self,
        owner_id: &str,
    ) -> Result<watch::Receiver<Option<AccountBalance>>> {
        let conn = self.conn()?;
        self.subscriptions
            .balance_receiver(owner_id, || query_balance(&conn, owner_id))
    }
}
