use serde::{Deserialize, Serialize};

/// One per owner. `total_pnl` is the sum of realized trade P&L; the other
/// two derived fields are projections of it onto `starting_balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub owner_id: String,
    pub starting_balance: f64,
    pub current_balance: f64,
    pub total_pnl: f64,
    pub total_return_percent: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBalanceInput {
    pub starting_balance: f64,
}
