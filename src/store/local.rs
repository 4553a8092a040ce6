use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::notify::Subscriptions;
use super::{JournalStore, StoreBackend, WriteBatch, WriteOp};
use crate::error::{JournalError, Result};
use crate::models::{AccountBalance, Payment, PaymentFilter, Trade, UserProfile};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    trades: Vec<Trade>, // insertion order
    #[serde(default)]
    balances: HashMap<String, AccountBalance>,
    #[serde(default)]
    payments: Vec<Payment>,
    #[serde(default)]
    users: HashMap<String, UserProfile>,
}

impl Snapshot {
    fn trades_for(&self, owner_id: &str) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .rev()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep newest-inserted first
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades
    }

    fn apply(&mut self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::PutTrade(trade) => {
                match self.trades.iter_mut().find(|t| t.id == trade.id) {
                    Some(existing) => *existing = trade.clone(),
                    None => self.trades.push(trade.clone()),
                }
            }
            WriteOp::DeleteTrade { owner_id, id } => {
                let before = self.trades.len();
                self.trades
                    .retain(|t| !(t.id == *id && t.owner_id == *owner_id));
                if self.trades.len() == before {
                    return Err(JournalError::NotFound(format!("Trade {}", id)));
                }
            }
            WriteOp::PutBalance(balance) => {
                self.balances
                    .insert(balance.owner_id.clone(), balance.clone());
            }
            WriteOp::PutPayment(payment) => {
                match self.payments.iter_mut().find(|p| p.id == payment.id) {
                    Some(existing) => *existing = payment.clone(),
                    None => self.payments.push(payment.clone()),
                }
            }
            WriteOp::PutUser(user) => {
                self.users.insert(user.uid.clone(), user.clone());
            }
        }
        Ok(())
    }
}

/// Local fallback store used when no database is configured (demo mode).
/// Lives in memory, optionally mirrored to a JSON file after each commit.
pub struct LocalStore {
    state: Mutex<Snapshot>,
    path: Option<PathBuf>,
    subscriptions: Subscriptions,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Snapshot::default()),
            path: None,
            subscriptions: Subscriptions::new(),
        }
    }

    /// Load (or start) a snapshot file
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Snapshot::default()
        };

        log::info!(
            "Local store loaded {} trades from {}",
            snapshot.trades.len(),
            path.display()
        );

        Ok(Self {
            state: Mutex::new(snapshot),
            path: Some(path.to_path_buf()),
            subscriptions: Subscriptions::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>> {
        self.state
            .lock()
            .map_err(|e| JournalError::Unavailable(format!("Local store poisoned: {}", e)))
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write aside then rename so a crash never leaves half a file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl JournalStore for LocalStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Local
    }

    async fn list_trades(&self, owner_id: &str) -> Result<Vec<Trade>> {
        Ok(self.lock()?.trades_for(owner_id))
    }

    async fn get_trade(&self, id: &str) -> Result<Option<Trade>> {
        Ok(self.lock()?.trades.iter().find(|t| t.id == id).cloned())
    }

    async fn get_balance(&self, owner_id: &str) -> Result<Option<AccountBalance>> {
        Ok(self.lock()?.balances.get(owner_id).cloned())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>> {
        Ok(self.lock()?.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let state = self.lock()?;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .rev()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(payments)
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        Ok(self.lock()?.users.get(uid).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let mut users: Vec<UserProfile> = self.lock()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.uid.cmp(&b.uid)));
        Ok(users)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.lock()?;

        // Copy-on-write: the live snapshot is only replaced once every op applied
        let mut next = state.clone();
        for op in batch.ops() {
            if let Err(e) = next.apply(op) {
                log::warn!("Aborting batch of {} writes: {}", batch.len(), e);
                return Err(e);
            }
        }
        self.persist(&next)?;
        *state = next;

        for owner_id in batch.trade_owners() {
            self.subscriptions
                .publish_trades(&owner_id, || Ok(state.trades_for(&owner_id)))?;
        }
        for owner_id in batch.balance_owners() {
            self.subscriptions
                .publish_balance(&owner_id, state.balances.get(&owner_id).cloned())?;
        }

        Ok(())
    }

    async fn subscribe_trades(&self, owner_id: &str) -> Result<watch::Receiver<Vec<Trade>>> {
        let state = self.lock()?;
        self.subscriptions
            .trades_receiver(owner_id, || Ok(state.trades_for(owner_id)))
    }

    async fn subscribe_balance(
        &self,
        owner_id: &str,
    ) -> Result<watch::Receiver<Option<AccountBalance>>> {
        let state = self.lock()?;
        self.subscriptions
            .balance_receiver(owner_id, || Ok(state.balances.get(owner_id).cloned()))
    }
}
