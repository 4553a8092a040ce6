use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{JournalError, Result};

static SYMBOL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9./:_-]{1,24}$").expect("valid symbol pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeDirection {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(TradeDirection::Long),
            "short" | "sell" => Ok(TradeDirection::Short),
            other => Err(JournalError::Validation(format!("Unknown direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            other => Err(JournalError::Validation(format!("Unknown status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub entry_date: i64,
    pub exit_date: Option<i64>,
    pub status: TradeStatus,

    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,

    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub strategy: Option<String>,
    pub balance_after: Option<f64>, // current balance right after this trade closed

    pub created_at: i64,
    pub updated_at: i64,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Recompute realized P&L from prices. Open trades carry no P&L.
    pub fn refresh_pnl(&mut self) {
        match (self.status, self.exit_price) {
            (TradeStatus::Closed, Some(exit)) => {
                let (pnl, pnl_percent) =
                    realized_pnl(self.direction, self.entry_price, exit, self.quantity);
                self.pnl = Some(pnl);
                self.pnl_percent = Some(pnl_percent);
            }
            _ => {
                self.pnl = None;
                self.pnl_percent = None;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !SYMBOL_PATTERN.is_match(&self.symbol) {
            return Err(JournalError::Validation(format!(
                "Invalid symbol: '{}'",
                self.symbol
            )));
        }
        if !is_positive(self.entry_price) {
            return Err(JournalError::Validation(
                "Entry price must be a positive number".to_string(),
            ));
        }
        if !is_positive(self.quantity) {
            return Err(JournalError::Validation(
                "Quantity must be a positive number".to_string(),
            ));
        }
        if let Some(exit) = self.exit_price {
            if !is_positive(exit) {
                return Err(JournalError::Validation(
                    "Exit price must be a positive number".to_string(),
                ));
            }
        }
        if self.is_closed() && self.exit_price.is_none() {
            return Err(JournalError::Validation(
                "A closed trade requires an exit price".to_string(),
            ));
        }
        if let Some(exit_date) = self.exit_date {
            if exit_date < self.entry_date {
                return Err(JournalError::Validation(
                    "Exit date cannot be before entry date".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Realized P&L and P&L percent (relative to position cost) of a closed position
pub fn realized_pnl(direction: TradeDirection, entry: f64, exit: f64, quantity: f64) -> (f64, f64) {
    let pnl = match direction {
        TradeDirection::Long => (exit - entry) * quantity,
        TradeDirection::Short => (entry - exit) * quantity,
    };
    let cost = entry * quantity;
    let pnl_percent = if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 };
    (pnl, pnl_percent)
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Trim, drop empties and de-duplicate while keeping first-seen order
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTradeInput {
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub entry_date: i64,
    pub exit_date: Option<i64>,
    pub status: TradeStatus,

    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub strategy: Option<String>,
}

/// Partial update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub symbol: Option<String>,
    pub direction: Option<TradeDirection>,
    pub entry_price: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub exit_price: Option<Option<f64>>,
    pub quantity: Option<f64>,
    pub entry_date: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub exit_date: Option<Option<i64>>,
    pub status: Option<TradeStatus>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub strategy: Option<Option<String>>,
}

impl TradeUpdate {
    /// Apply onto a copy of `trade`. id, owner and creation time never change.
    pub fn apply_to(&self, trade: &Trade, now: i64) -> Trade {
        let mut updated = trade.clone();

        if let Some(symbol) = &self.symbol {
            updated.symbol = symbol.trim().to_uppercase();
        }
        if let Some(direction) = self.direction {
            updated.direction = direction;
        }
        if let Some(entry_price) = self.entry_price {
            updated.entry_price = entry_price;
        }
        if let Some(exit_price) = self.exit_price {
            updated.exit_price = exit_price;
        }
        if let Some(quantity) = self.quantity {
            updated.quantity = quantity;
        }
        if let Some(entry_date) = self.entry_date {
            updated.entry_date = entry_date;
        }
        if let Some(exit_date) = self.exit_date {
            updated.exit_date = exit_date;
        }
        if let Some(status) = self.status {
            updated.status = status;
        }
        if let Some(notes) = &self.notes {
            updated.notes = notes.clone();
        }
        if let Some(tags) = &self.tags {
            updated.tags = normalize_tags(tags.clone());
        }
        if let Some(strategy) = &self.strategy {
            updated.strategy = strategy.clone();
        }

        updated.updated_at = now;
        updated.refresh_pnl();
        updated
    }
}

// Distinguishes an explicit `null` (clear) from a missing field (keep)
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFilters {
    pub status: Option<TradeStatus>,
    pub symbol: Option<String>,
    pub tag: Option<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl TradeFilters {
    pub fn matches(&self, trade: &Trade) -> bool {
        if let Some(status) = self.status {
            if trade.status != status {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if !trade.symbol.to_uppercase().contains(&symbol.to_uppercase()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !trade.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(start_date) = self.start_date {
            if trade.entry_date < start_date {
                return false;
            }
        }
        if let Some(end_date) = self.end_date {
            if trade.entry_date > end_date {
                return false;
            }
        }
        true
    }
}
