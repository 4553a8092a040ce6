use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::round_to;
use super::stats::closed_pnl;
use crate::models::Trade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurvePoint {
    pub date: String,
    pub daily_pnl: f64,
    pub cumulative_pnl: f64,
    pub balance: f64,
    pub trade_count: u32,
}

/// Daily realized P&L over closed trades, in date order (UTC days)
pub fn equity_curve(trades: &[Trade], starting_balance: f64) -> Vec<EquityCurvePoint> {
    // Group by exit date
    let mut daily: BTreeMap<String, (f64, u32)> = BTreeMap::new();

    for trade in trades {
        let (Some(pnl), Some(exit_date)) = (closed_pnl(trade), trade.exit_date) else {
            continue;
        };
        let Some(day) = chrono::DateTime::from_timestamp(exit_date, 0) else {
            log::warn!("Skipping trade {} with invalid exit date {}", trade.id, exit_date);
            continue;
        };

        let entry = daily.entry(day.format("%Y-%m-%d").to_string()).or_insert((0.0, 0));
        entry.0 += pnl;
        entry.1 += 1;
    }

    let mut cumulative_pnl = 0.0;
    daily
        .into_iter()
        .map(|(date, (daily_pnl, trade_count))| {
            cumulative_pnl += daily_pnl;
            EquityCurvePoint {
                date,
                daily_pnl: round_to(daily_pnl, 2),
                cumulative_pnl: round_to(cumulative_pnl, 2),
                balance: round_to(starting_balance + cumulative_pnl, 2),
                trade_count,
            }
        })
        .collect()
}
