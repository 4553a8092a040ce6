use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analytics::TradingStats;
use crate::commands::summarize;
use crate::error::Result;
use crate::models::{AccountBalance, Trade};
use crate::store::JournalStore;

/// Drift above this is reported; below it is rounding noise
const DRIFT_TOLERANCE: f64 = 0.01;

/// Last computed dashboard values for one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub stats: TradingStats,
    pub zella_score: u32,
    pub balance: Option<AccountBalance>,
    /// Cached balance total minus the trades-derived sum
    pub drift: f64,
}

impl DashboardSnapshot {
    fn compute(trades: &[Trade], balance: Option<&AccountBalance>) -> Self {
        let dashboard = summarize(trades, balance);
        let drift = balance.map(|b| b.drift(trades)).unwrap_or(0.0);
        Self {
            stats: dashboard.stats,
            zella_score: dashboard.zella_score,
            balance: dashboard.balance,
            drift,
        }
    }

    pub fn is_drifting(&self) -> bool {
        self.drift.abs() > DRIFT_TOLERANCE
    }
}

/// Background task that recomputes an owner's dashboard on every trade or
/// balance notification.
///
/// The two channels fire independently, so a snapshot may pair fresh trades
/// with a stale balance for one step. `recalculate_balance` repairs any
/// drift that persists.
pub struct DashboardFeed {
    owner_id: String,
    snapshots: watch::Receiver<DashboardSnapshot>,
    handle: JoinHandle<()>,
}

impl DashboardFeed {
    pub async fn spawn(store: &dyn JournalStore, owner_id: &str) -> Result<Self> {
        let mut trades_rx = store.subscribe_trades(owner_id).await?;
        let mut balance_rx = store.subscribe_balance(owner_id).await?;

        let initial = DashboardSnapshot::compute(
            &trades_rx.borrow_and_update(),
            balance_rx.borrow_and_update().as_ref(),
        );
        let (tx, snapshots) = watch::channel(initial);

        let owner = owner_id.to_string();
        let handle = tokio::spawn(async move {
            let mut was_drifting = false;

            loop {
                tokio::select! {
                    changed = trades_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = balance_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let snapshot = {
                    let trades = trades_rx.borrow_and_update();
                    let balance = balance_rx.borrow_and_update();
                    DashboardSnapshot::compute(&trades, balance.as_ref())
                };

                let drifting = snapshot.is_drifting();
                if drifting && !was_drifting {
                    log::warn!(
                        "Balance for {} is {:.2} away from its trades; run a recalculation",
                        owner,
                        snapshot.drift
                    );
                }
                was_drifting = drifting;

                if tx.send(snapshot).is_err() {
                    break;
                }
            }

            log::debug!("Dashboard feed for {} stopped", owner);
        });

        log::info!("Dashboard feed started for {}", owner_id);
        Ok(Self {
            owner_id: owner_id.to_string(),
            snapshots,
            handle,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Latest snapshot
    pub fn current(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every recomputation
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for DashboardFeed {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
