use super::finite_or_zero;
use super::stats::closed_pnl;
use crate::error::{JournalError, Result};
use crate::models::{AccountBalance, Trade};

/// What a trade adds to the owner's realized P&L (zero unless closed)
pub fn realized_contribution(trade: &Trade) -> f64 {
    closed_pnl(trade).unwrap_or(0.0)
}

/// Signed change in realized P&L caused by one mutation.
///
/// `before` is the stored trade prior to the mutation (None on create),
/// `after` the trade as it will be stored (None on delete).
pub fn contribution_delta(before: Option<&Trade>, after: Option<&Trade>) -> f64 {
    after.map(realized_contribution).unwrap_or(0.0)
        - before.map(realized_contribution).unwrap_or(0.0)
}

impl AccountBalance {
    /// Record materialized lazily on first access
    pub fn zeroed(owner_id: &str, now: i64) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            starting_balance: 0.0,
            current_balance: 0.0,
            total_pnl: 0.0,
            total_return_percent: 0.0,
            updated_at: now,
        }
    }

    /// Record created on an owner's first mutation.
    ///
    /// Starts at [`DEFAULT_STARTING_BALANCE`](super::DEFAULT_STARTING_BALANCE)
    /// (10,000) rather than zero, so a first losing trade on an account that
    /// never set its funding still leaves a non-negative balance. Owners
    /// replace it with `set_starting_balance`.
    pub fn initial(owner_id: &str, now: i64) -> Self {
        let starting_balance = super::DEFAULT_STARTING_BALANCE;
        Self {
            starting_balance,
            current_balance: starting_balance,
            ..Self::zeroed(owner_id, now)
        }
    }

    /// Incremental path: fold one mutation's delta into the running total.
    /// Must be called exactly once per logical mutation.
    pub fn apply_delta(&self, delta: f64, now: i64) -> Result<Self> {
        let total_pnl = finite_or_zero(self.total_pnl) + finite_or_zero(delta);
        Self::project(&self.owner_id, self.starting_balance, total_pnl, now)
    }

    /// Changing the starting balance keeps `total_pnl` as is and only moves
    /// the dependent fields.
    pub fn with_starting_balance(&self, starting_balance: f64, now: i64) -> Result<Self> {
        Self::project(&self.owner_id, starting_balance, finite_or_zero(self.total_pnl), now)
    }

    /// Drift repair: rebuild the totals from the complete trade set
    pub fn recalculated(&self, trades: &[Trade], now: i64) -> Result<Self> {
        let total_pnl: f64 = trades.iter().map(realized_contribution).sum();
        Self::project(&self.owner_id, self.starting_balance, total_pnl, now)
    }

    fn project(owner_id: &str, starting_balance: f64, total_pnl: f64, now: i64) -> Result<Self> {
        if !starting_balance.is_finite() || starting_balance < 0.0 {
            return Err(JournalError::Validation(format!(
                "Starting balance must be a non-negative number, got {}",
                starting_balance
            )));
        }

        let current_balance = starting_balance + total_pnl;
        if current_balance < 0.0 {
            return Err(JournalError::Validation(format!(
                "Resulting balance would be negative ({:.2})",
                current_balance
            )));
        }

        let total_return_percent = if starting_balance > 0.0 {
            total_pnl / starting_balance * 100.0
        } else {
            0.0
        };

        Ok(Self {
            owner_id: owner_id.to_string(),
            starting_balance,
            current_balance,
            total_pnl,
            total_return_percent,
            updated_at: now,
        })
    }

    /// Gap between the cached total and the trades-derived sum
    pub fn drift(&self, trades: &[Trade]) -> f64 {
        let derived: f64 = trades.iter().map(realized_contribution).sum();
        finite_or_zero(self.total_pnl) - derived
    }
}
