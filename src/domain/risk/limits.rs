use rust_decimal::Decimal;

/// The capital and risk-tolerance figures the ledger enforces (I2-I4). Built
/// once from configuration at startup and shared (read-only) by every
/// component that needs to reason about capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskLimits {
    pub capital: Decimal,
    pub max_open_trades: u32,
    pub max_portfolio_risk: Decimal,
    pub daily_loss_limit: Decimal,
    pub max_loss_per_trade: Decimal,
    pub max_hold_minutes: i64,
    pub fast_exit_minutes: i64,
    pub fast_exit_threshold: Decimal,
    pub news_blackout_window_min: i64,
}

impl RiskLimits {
    pub fn max_portfolio_margin(&self) -> Decimal {
        self.capital * self.max_portfolio_risk
    }

    pub fn daily_loss_breach_threshold(&self) -> Decimal {
        -(self.capital * self.daily_loss_limit)
    }

    pub fn max_loss_per_trade_absolute(&self) -> Decimal {
        self.capital * self.max_loss_per_trade
    }

    pub fn per_trade_fraction(&self) -> Decimal {
        Decimal::ONE / Decimal::from(self.max_open_trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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
    fn max_portfolio_margin_matches_spec_example() {
        assert_eq!(limits().max_portfolio_margin(), dec!(2000.00));
    }

    #[test]
    fn daily_loss_breach_threshold_matches_spec_example() {
        assert_eq!(limits().daily_loss_breach_threshold(), dec!(-500.00));
    }

    #[test]
    fn per_trade_fraction_divides_evenly() {
        assert_eq!(limits().per_trade_fraction(), dec!(0.3333333333333333333333333333));
    }
}
