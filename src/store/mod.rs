pub mod local;
pub mod notify;
pub mod sqlite;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{AppConfig, BackendConfig};
use crate::error::Result;
use crate::models::{AccountBalance, Payment, PaymentFilter, Trade, UserProfile};

pub use local::LocalStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Local,
}

/// One document write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutTrade(Trade),
    DeleteTrade { owner_id: String, id: String },
    PutBalance(AccountBalance),
    PutPayment(Payment),
    PutUser(UserProfile),
}

/// Writes that land together or not at all
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_trade(mut self, trade: Trade) -> Self {
        self.ops.push(WriteOp::PutTrade(trade));
        self
    }

    pub fn delete_trade(mut self, owner_id: &str, id: &str) -> Self {
        self.ops.push(WriteOp::DeleteTrade {
            owner_id: owner_id.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn put_balance(mut self, balance: AccountBalance) -> Self {
        self.ops.push(WriteOp::PutBalance(balance));
        self
    }

    pub fn put_payment(mut self, payment: Payment) -> Self {
        self.ops.push(WriteOp::PutPayment(payment));
        self
    }

    pub fn put_user(mut self, user: UserProfile) -> Self {
        self.ops.push(WriteOp::PutUser(user));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Owners whose trade list changes when this batch lands
    pub fn trade_owners(&self) -> BTreeSet<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                WriteOp::PutTrade(trade) => Some(trade.owner_id.clone()),
                WriteOp::DeleteTrade { owner_id, .. } => Some(owner_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Owners whose balance record changes when this batch lands
    pub fn balance_owners(&self) -> BTreeSet<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                WriteOp::PutBalance(balance) => Some(balance.owner_id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Storage capability behind every journal operation: load, atomic save,
/// and live subscriptions. Selected once at startup.
#[async_trait]
pub trait JournalStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// An owner's trades, newest first
    async fn list_trades(&self, owner_id: &str) -> Result<Vec<Trade>>;

    async fn get_trade(&self, id: &str) -> Result<Option<Trade>>;

    async fn get_balance(&self, owner_id: &str) -> Result<Option<AccountBalance>>;

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>>;

    /// Matching payments, most recently submitted first
    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>>;

    async fn list_users(&self) -> Result<Vec<UserProfile>>;

    /// Apply every op or none. Subscribers are notified only after success.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Live trade list for an owner, primed with the current value
    async fn subscribe_trades(&self, owner_id: &str) -> Result<watch::Receiver<Vec<Trade>>>;

    /// Live balance record for an owner, primed with the current value
    async fn subscribe_balance(
        &self,
        owner_id: &str,
    ) -> Result<watch::Receiver<Option<AccountBalance>>>;
}

/// Pick the backend from configuration
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn JournalStore>> {
    match &config.backend {
        BackendConfig::Sqlite { path } => {
            log::info!("Using SQLite journal store at {}", path.display());
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        BackendConfig::Local { path: Some(path) } => {
            log::warn!(
                "No database configured, using local demo storage at {}",
                path.display()
            );
            Ok(Arc::new(LocalStore::open(path)?))
        }
        BackendConfig::Local { path: None } => {
            log::warn!("No database configured, using in-memory demo storage");
            Ok(Arc::new(LocalStore::new()))
        }
    }
}
