pub mod equity;
pub mod reconcile;
pub mod score;
pub mod stats;

pub use equity::{equity_curve, EquityCurvePoint};
pub use reconcile::{contribution_delta, realized_contribution};
pub use score::zella_score;
pub use stats::{calculate_stats, DateRange, TradingStats, DEFAULT_STARTING_BALANCE};

/// NaN and infinities degrade to zero
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    finite_or_zero((value * factor).round() / factor)
}
