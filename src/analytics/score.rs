use super::finite_or_zero;
use super::stats::TradingStats;
use crate::models::AccountBalance;

/// Composite 0-100 display score over win rate, profit factor,
/// win/loss ratio and total return. Tier boundaries are inclusive.
///
/// The return component reads the balance record when one is given and
/// falls back to the return computed into `stats` otherwise.
pub fn zella_score(stats: &TradingStats, balance: Option<&AccountBalance>) -> u32 {
    let win_rate = finite_or_zero(stats.win_rate);
    let profit_factor = finite_or_zero(stats.profit_factor);
    let average_win = finite_or_zero(stats.average_win);
    let average_loss = finite_or_zero(stats.average_loss);
    let total_return = finite_or_zero(
        balance
            .map(|b| b.total_return_percent)
            .unwrap_or(stats.total_return_percent),
    );

    let ratio = if average_loss > 0.0 {
        average_win / average_loss
    } else {
        0.0
    };

    let total = win_rate_points(win_rate)
        + profit_factor_points(profit_factor)
        + win_loss_ratio_points(ratio)
        + return_points(total_return);

    total.round().clamp(0.0, 100.0) as u32
}

fn win_rate_points(win_rate: f64) -> f64 {
    match win_rate {
        w if w >= 60.0 => 30.0,
        w if w >= 50.0 => 25.0,
        w if w >= 40.0 => 20.0,
        w if w >= 30.0 => 15.0,
        w => (w / 2.0).max(0.0),
    }
}

fn profit_factor_points(profit_factor: f64) -> f64 {
    match profit_factor {
        p if p >= 2.0 => 25.0,
        p if p >= 1.5 => 20.0,
        p if p >= 1.2 => 15.0,
        p if p >= 1.0 => 10.0,
        p => (p * 5.0).max(0.0),
    }
}

fn win_loss_ratio_points(ratio: f64) -> f64 {
    match ratio {
        r if r >= 2.0 => 20.0,
        r if r >= 1.5 => 15.0,
        r if r >= 1.0 => 10.0,
        r => (r * 5.0).max(0.0),
    }
}

fn return_points(total_return: f64) -> f64 {
    match total_return {
        r if r >= 20.0 => 25.0,
        r if r >= 15.0 => 20.0,
        r if r >= 10.0 => 15.0,
        r if r >= 5.0 => 10.0,
        r if r >= 0.0 => 5.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(
        win_rate: f64,
        profit_factor: f64,
        avg_win: f64,
        avg_loss: f64,
        ret: f64,
    ) -> TradingStats {
        TradingStats {
            win_rate,
            profit_factor,
            average_win: avg_win,
            average_loss: avg_loss,
            total_return_percent: ret,
            ..Default::default()
        }
    }

    #[test]
    fn test_perfect_score() {
        assert_eq!(zella_score(&stats(75.0, 3.0, 300.0, 100.0, 40.0), None), 100);
    }

    #[test]
    fn test_empty_stats_score_only_return_floor() {
        // 0% return still lands in the ">= 0" tier
        assert_eq!(zella_score(&TradingStats::default(), None), 5);
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        assert_eq!(win_rate_points(60.0), 30.0);
        assert_eq!(win_rate_points(59.99), 25.0);
        assert_eq!(win_rate_points(30.0), 15.0);
        assert_eq!(win_rate_points(20.0), 10.0);
        assert_eq!(profit_factor_points(1.2), 15.0);
        assert_eq!(profit_factor_points(0.5), 2.5);
        assert_eq!(win_loss_ratio_points(1.5), 15.0);
        assert_eq!(win_loss_ratio_points(0.4), 2.0);
        assert_eq!(return_points(5.0), 10.0);
        assert_eq!(return_points(-0.01), 0.0);
    }

    #[test]
    fn test_scenario_with_one_loss() {
        // win rate 66.7, pf 2.0, ratio 1.0, return 0.75%
        let s = stats(66.7, 2.0, 75.0, 75.0, 0.75);
        assert_eq!(zella_score(&s, None), 30 + 25 + 10 + 5);
    }

    #[test]
    fn test_balance_record_return_takes_precedence() {
        let s = stats(0.0, 0.0, 0.0, 0.0, 0.0);
        let balance = AccountBalance {
            owner_id: "user-1".to_string(),
            starting_balance: 1_000.0,
            current_balance: 1_250.0,
            total_pnl: 250.0,
            total_return_percent: 25.0,
            updated_at: 0,
        };
        assert_eq!(zella_score(&s, Some(&balance)), 25);
    }

    #[test]
    fn test_nan_inputs_degrade_to_zero() {
        let s = stats(f64::NAN, f64::INFINITY, f64::NAN, 0.0, f64::NAN);
        assert_eq!(zella_score(&s, None), 5);
    }

    #[test]
    fn test_monotonic_in_each_input() {
        let grid = [
            -10.0, 0.0, 0.5, 1.0, 1.2, 1.5, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 40.0, 50.0, 60.0,
            100.0,
        ];
        let base = [50.0, 1.3, 1.2, 7.0];

        for input in 0..4 {
            let mut previous = 0;
            for value in grid {
                let mut v = base;
                v[input] = value;
                // ratio is expressed through avg_win with avg_loss fixed at 1
                let score = zella_score(&stats(v[0], v[1], v[2], 1.0, v[3]), None);
                assert!(score <= 100);
                assert!(
                    score >= previous,
                    "score dropped for input {} at value {}",
                    input,
                    value
                );
                previous = score;
            }
        }
    }
}
