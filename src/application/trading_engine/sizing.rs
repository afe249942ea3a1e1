use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::risk::RiskLimits;

const LIQUIDITY_CAP: Decimal = dec!(0.005);

/// Adaptive leverage lookup from score (spec.md §4.4.1).
pub fn leverage_for_score(score: u8) -> u8 {
    match score {
        90..=255 => 7,
        80..=89 => 5,
        70..=79 => 3,
        _ => 2,
    }
}

/// Result of sizing a candidate into a concrete order: `None` if no feasible
/// leverage keeps the per-trade loss within `MAX_LOSS_PER_TRADE` even at 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingPlan {
    pub leverage: u8,
    pub notional: Decimal,
    pub margin: Decimal,
}

/// Runs steps 1-3 of spec.md §4.4: adaptive leverage, notional sizing,
/// per-trade loss cap with leverage step-down.
pub fn size_candidate(limits: &RiskLimits, score: u8, volume_24h: Decimal, sl_distance_pct: Decimal) -> Option<SizingPlan> {
    let mut leverage = leverage_for_score(score);
    loop {
        let notional = (limits.capital * limits.per_trade_fraction() * Decimal::from(leverage)).min(volume_24h * LIQUIDITY_CAP);
        let projected_loss = sl_distance_pct * Decimal::from(leverage) * notional;
        if projected_loss <= limits.max_loss_per_trade_absolute() {
            let margin = notional / Decimal::from(leverage);
            return Some(SizingPlan { leverage, notional, margin });
        }
        if leverage <= 1 {
            return None;
        }
        leverage -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimits {
        RiskLimits {
            capital: dec!(10000),
            max_open_trades: 3,
            max_portfolio_risk: dec!(0.20),
            daily_loss_limit: dec!(0.05),
            max_loss_per_trade: dec!(0.02),
            max_hold_minutes: 10,
            fast_exit_minutes: 3,
            fast_exit_threshold: dec!(0.003),
            news_blackout_window_min: 10,
        }
    }

    #[test]
    fn leverage_boundaries_match_spec_table() {
        assert_eq!(leverage_for_score(59), 2);
        assert_eq!(leverage_for_score(60), 2);
        assert_eq!(leverage_for_score(69), 2);
        assert_eq!(leverage_for_score(70), 3);
        assert_eq!(leverage_for_score(79), 3);
        assert_eq!(leverage_for_score(80), 5);
        assert_eq!(leverage_for_score(89), 5);
        assert_eq!(leverage_for_score(90), 7);
        assert_eq!(leverage_for_score(100), 7);
    }

    #[test]
    fn notional_is_capped_by_liquidity_when_volume_is_thin() {
        let plan = size_candidate(&limits(), 90, dec!(1_000_000), dec!(0.004)).unwrap();
        // 10000 * (1/3) * 7 = 23333.33, liquidity cap = 1_000_000 * 0.005 = 5000.
        assert_eq!(plan.notional, dec!(5000));
        assert_eq!(plan.leverage, 7);
    }

    #[test]
    fn leverage_steps_down_until_loss_cap_satisfied() {
        // sl_distance_pct wide enough that 7x at full notional breaches the
        // 2%-of-capital loss cap ($200); stepping down leverage should shrink
        // notional (per_trade_fraction scales with leverage) until it fits.
        let plan = size_candidate(&limits(), 90, dec!(100_000_000), dec!(0.02)).unwrap();
        assert!(plan.leverage < 7);
        let projected_loss = dec!(0.02) * Decimal::from(plan.leverage) * plan.notional;
        assert!(projected_loss <= limits().max_loss_per_trade_absolute());
    }

    #[test]
    fn infeasible_even_at_leverage_one_returns_none() {
        // An absurdly wide stop makes every leverage infeasible.
        let result = size_candidate(&limits(), 90, dec!(100_000_000), dec!(0.9));
        assert!(result.is_none());
    }

    #[test]
    fn margin_equals_notional_over_leverage() {
        let plan = size_candidate(&limits(), 70, dec!(100_000_000), dec!(0.001)).unwrap();
        assert_eq!(plan.margin, plan.notional / Decimal::from(plan.leverage));
    }
}
