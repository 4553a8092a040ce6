use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::{JournalError, Result};
use crate::models::{AccountBalance, Trade};

/// Per-owner watch channels shared by the store backends.
///
/// Backends call into this while holding their own state lock, so a
/// subscriber never misses a commit that lands between its initial load
/// and its registration.
#[derive(Default)]
pub struct Subscriptions {
    trades: Mutex<HashMap<String, watch::Sender<Vec<Trade>>>>,
    balances: Mutex<HashMap<String, watch::Sender<Option<AccountBalance>>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades_receiver(
        &self,
        owner_id: &str,
        load: impl FnOnce() -> Result<Vec<Trade>>,
    ) -> Result<watch::Receiver<Vec<Trade>>> {
        let mut channels = self.trades.lock().map_err(lock_error)?;
        if let Some(sender) = channels.get(owner_id) {
            return Ok(sender.subscribe());
        }
        let (sender, receiver) = watch::channel(load()?);
        channels.insert(owner_id.to_string(), sender);
        Ok(receiver)
    }

    pub fn balance_receiver(
        &self,
        owner_id: &str,
        load: impl FnOnce() -> Result<Option<AccountBalance>>,
    ) -> Result<watch::Receiver<Option<AccountBalance>>> {
        let mut channels = self.balances.lock().map_err(lock_error)?;
        if let Some(sender) = channels.get(owner_id) {
            return Ok(sender.subscribe());
        }
        let (sender, receiver) = watch::channel(load()?);
        channels.insert(owner_id.to_string(), sender);
        Ok(receiver)
    }

    /// Push the owner's fresh trade list. `load` only runs if someone listens.
    pub fn publish_trades(
        &self,
        owner_id: &str,
        load: impl FnOnce() -> Result<Vec<Trade>>,
    ) -> Result<()> {
        let mut channels = self.trades.lock().map_err(lock_error)?;
        let Some(sender) = channels.get(owner_id) else {
            return Ok(());
        };
        if sender.receiver_count() == 0 {
            channels.remove(owner_id);
            return Ok(());
        }
        sender.send_replace(load()?);
        Ok(())
    }

    pub fn publish_balance(&self, owner_id: &str, balance: Option<AccountBalance>) -> Result<()> {
        let mut channels = self.balances.lock().map_err(lock_error)?;
        let Some(sender) = channels.get(owner_id) else {
            return Ok(());
        };
        if sender.receiver_count() == 0 {
            channels.remove(owner_id);
            return Ok(());
        }
        sender.send_replace(balance);
        Ok(())
    }
}

fn lock_error<T>(err: std::sync::PoisonError<T>) -> JournalError {
    JournalError::Unavailable(format!("Subscription registry poisoned: {}", err))
}
