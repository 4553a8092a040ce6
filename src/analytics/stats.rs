use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{finite_or_zero, round_to};
use crate::models::{AccountBalance, Trade};

/// Starting balance assumed before a user has a balance record
pub const DEFAULT_STARTING_BALANCE: f64 = 10_000.0;

const DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingStats {
    pub total_trades: u32,
    pub open_trades: u32,
    pub closed_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub breakeven_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub total_pnl: f64,
    pub account_balance: f64,
    pub current_balance: f64,
    pub total_return_percent: f64,
}

/// Realized P&L usable in aggregates: closed trades with a finite P&L only
pub fn closed_pnl(trade: &Trade) -> Option<f64> {
    if !trade.is_closed() {
        return None;
    }
    trade.pnl.filter(|pnl| pnl.is_finite())
}

/// Aggregate a user's trades. Never fails; malformed numbers are excluded.
///
/// Total P&L is always the trades-derived sum. The balance record only
/// contributes the starting balance, so a stale record paired with a fresh
/// trade set (or the reverse) still yields self-consistent numbers.
pub fn calculate_stats(trades: &[Trade], balance: Option<&AccountBalance>) -> TradingStats {
    let starting_balance = balance
        .map(|b| finite_or_zero(b.starting_balance).max(0.0))
        .unwrap_or(DEFAULT_STARTING_BALANCE);

    let mut stats = TradingStats {
        total_trades: trades.len() as u32,
        open_trades: trades.iter().filter(|t| !t.is_closed()).count() as u32,
        account_balance: starting_balance,
        current_balance: starting_balance,
        ..Default::default()
    };

    let closed: Vec<f64> = trades.iter().filter_map(closed_pnl).collect();
    stats.closed_trades = closed.len() as u32;
    if closed.is_empty() {
        return stats;
    }

    let wins: Vec<f64> = closed.iter().copied().filter(|pnl| *pnl > 0.0).collect();
    let losses: Vec<f64> = closed.iter().copied().filter(|pnl| *pnl < 0.0).collect();

    stats.winning_trades = wins.len() as u32;
    stats.losing_trades = losses.len() as u32;
    stats.breakeven_trades = stats.closed_trades - stats.winning_trades - stats.losing_trades;

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|pnl| pnl.abs()).sum();
    let total_pnl: f64 = closed.iter().sum();

    let decided = wins.len() + losses.len();
    stats.win_rate = if decided > 0 {
        round_to(wins.len() as f64 / decided as f64 * 100.0, 1)
    } else {
        0.0
    };

    // Falls back to the win sum when nothing was lost
    stats.profit_factor = if gross_loss > 0.0 {
        round_to(gross_profit / gross_loss, 2)
    } else {
        round_to(gross_profit, 2)
    };

    if !wins.is_empty() {
        stats.average_win = round_to(gross_profit / wins.len() as f64, 2);
        stats.largest_win = round_to(wins.iter().copied().fold(f64::MIN, f64::max), 2);
    }
    if !losses.is_empty() {
        stats.average_loss = round_to(gross_loss / losses.len() as f64, 2);
        stats.largest_loss = round_to(losses.iter().copied().fold(f64::MAX, f64::min), 2);
    }

    stats.gross_profit = round_to(gross_profit, 2);
    stats.gross_loss = round_to(gross_loss, 2);
    stats.total_pnl = round_to(total_pnl, 2);
    stats.current_balance = round_to(starting_balance + total_pnl, 2);
    stats.total_return_percent = if starting_balance > 0.0 {
        round_to(total_pnl / starting_balance * 100.0, 2)
    } else {
        0.0
    };

    stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRange {
    #[default]
    All,
    Today,
    Week,
    Month,
    ThreeMonths,
    SixMonths,
    Year,
}

impl DateRange {
    /// Parse the dashboard's range keys; unknown keys mean "all"
    pub fn parse(key: Option<&str>) -> Self {
        match key {
            Some("today") => DateRange::Today,
            Some("week") => DateRange::Week,
            Some("month") => DateRange::Month,
            Some("3months") => DateRange::ThreeMonths,
            Some("6months") => DateRange::SixMonths,
            Some("year") => DateRange::Year,
            _ => DateRange::All,
        }
    }

    /// Earliest unix timestamp inside the range
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<i64> {
        let now_ts = now.timestamp();
        match self {
            DateRange::All => None,
            DateRange::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc().timestamp()),
            DateRange::Week => Some(now_ts - 7 * DAY_SECS),
            DateRange::Month => Some(now_ts - 30 * DAY_SECS),
            DateRange::ThreeMonths => Some(now_ts - 90 * DAY_SECS),
            DateRange::SixMonths => Some(now_ts - 180 * DAY_SECS),
            DateRange::Year => Some(now_ts - 365 * DAY_SECS),
        }
    }

    /// Closed trades are placed by exit time, open ones by entry time
    pub fn filter(&self, trades: &[Trade], now: DateTime<Utc>) -> Vec<Trade> {
        match self.threshold(now) {
            None => trades.to_vec(),
            Some(threshold) => trades
                .iter()
                .filter(|t| t.exit_date.unwrap_or(t.entry_date) >= threshold)
                .cloned()
                .collect(),
        }
    }
}
