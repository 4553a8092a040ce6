use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analytics::{
    calculate_stats, equity_curve, zella_score, DateRange, EquityCurvePoint, TradingStats,
    DEFAULT_STARTING_BALANCE,
};
use crate::error::Result;
use crate::models::{AccountBalance, Trade};
use crate::store::JournalStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub stats: TradingStats,
    pub zella_score: u32,
    /// None until the owner's first mutation creates the record
    pub balance: Option<AccountBalance>,
}

/// Stats and score for one trade set / balance pairing
pub fn summarize(trades: &[Trade], balance: Option<&AccountBalance>) -> DashboardStats {
    let stats = calculate_stats(trades, balance);
    let zella_score = zella_score(&stats, balance);
    DashboardStats {
        stats,
        zella_score,
        balance: balance.cloned(),
    }
}

pub async fn get_dashboard_stats(
    store: &dyn JournalStore,
    owner_id: &str,
    date_range: Option<&str>,
) -> Result<DashboardStats> {
    let (trades, balance) =
        futures::try_join!(store.list_trades(owner_id), store.get_balance(owner_id))?;

    let range = DateRange::parse(date_range);
    let trades = range.filter(&trades, Utc::now());
    log::debug!(
        "Dashboard stats for {} over {:?}: {} trades",
        owner_id,
        range,
        trades.len()
    );

    Ok(summarize(&trades, balance.as_ref()))
}

pub async fn get_equity_curve(
    store: &dyn JournalStore,
    owner_id: &str,
    date_range: Option<&str>,
) -> Result<Vec<EquityCurvePoint>> {
    let (trades, balance) =
        futures::try_join!(store.list_trades(owner_id), store.get_balance(owner_id))?;

    let trades = DateRange::parse(date_range).filter(&trades, Utc::now());
    let starting_balance = balance
        .map(|b| b.starting_balance)
        .unwrap_or(DEFAULT_STARTING_BALANCE);

    Ok(equity_curve(&trades, starting_balance))
}
