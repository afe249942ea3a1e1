use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::risk::RiskLimits;
use crate::domain::trading::direction::Direction;
use crate::domain::trading::position::Position;

/// Priority-ordered exit triggers (spec.md §4.5); first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    SlHit,
    TpHit,
    NewsBlackout,
    TimeExit,
    FastDiscard,
}

impl ExitTrigger {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ExitTrigger::SlHit => "SL_HIT",
            ExitTrigger::TpHit => "TP_HIT",
            ExitTrigger::NewsBlackout => "NEWS_BLACKOUT",
            ExitTrigger::TimeExit => "TIME_EXIT",
            ExitTrigger::FastDiscard => "FAST_DISCARD",
        }
    }
}

/// Evaluates the exit state machine for one OPEN position against the
/// current mark price. `news_blackout_starts_within` reports whether an
/// externally-flagged blackout window begins within the configured lookahead
/// (spec.md §4.5 trigger 3); `None` when no news feed is wired up.
pub fn evaluate_exit(
    position: &Position,
    mark_price: Decimal,
    now: DateTime<Utc>,
    limits: &RiskLimits,
    news_blackout_starts_within: bool,
) -> Option<ExitTrigger> {
    let sl_price = position.sl_price?;
    let tp_price = position.tp_price?;
    let opened_at = position.opened_at?;

    let sl_hit = match position.direction {
        Direction::Long => mark_price <= sl_price,
        Direction::Short => mark_price >= sl_price,
    };
    if sl_hit {
        return Some(ExitTrigger::SlHit);
    }

    let tp_hit = match position.direction {
        Direction::Long => mark_price >= tp_price,
        Direction::Short => mark_price <= tp_price,
    };
    if tp_hit {
        return Some(ExitTrigger::TpHit);
    }

    if news_blackout_starts_within {
        return Some(ExitTrigger::NewsBlackout);
    }

    let held_minutes = (now - opened_at).num_minutes();
    if held_minutes >= limits.max_hold_minutes {
        return Some(ExitTrigger::TimeExit);
    }

    if held_minutes >= limits.fast_exit_minutes {
        if let Some(pnl_pct) = position.unrealized_pnl_pct(mark_price) {
            if pnl_pct.abs() < limits.fast_exit_threshold * Decimal::ONE_HUNDRED {
                return Some(ExitTrigger::FastDiscard);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::domain::symbol::Symbol;
    use crate::domain::trading::position::PositionStatus;

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

    fn base_position(opened_minutes_ago: i64, now: DateTime<Utc>) -> Position {
        Position {
            reservation_id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            direction: Direction::Long,
            status: PositionStatus::Open,
            margin_committed: dec!(100),
            leverage: 5,
            score_at_entry: 80,
            entry_price: Some(dec!(100)),
            quantity: Some(dec!(1)),
            tp_price: Some(dec!(104)),
            sl_price: Some(dec!(98)),
            atr_at_entry: Some(dec!(1)),
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
            opened_at: Some(now - chrono::Duration::minutes(opened_minutes_ago)),
            reserved_at: now - chrono::Duration::minutes(opened_minutes_ago),
            stuck_since: None,
            consecutive_close_failures: 0,
            version: 1,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn sl_hit_takes_priority_over_tp_hit_if_both_somehow_true() {
        let pos = base_position(1, now());
        // Can't naturally both be true with tp=104/sl=98, but priority is what we test:
        // a price at or below sl always resolves to SL_HIT regardless of other state.
        let result = evaluate_exit(&pos, dec!(97), now(), &limits(), false);
        assert_eq!(result, Some(ExitTrigger::SlHit));
    }

    #[test]
    fn tp_hit_for_long() {
        let pos = base_position(1, now());
        let result = evaluate_exit(&pos, dec!(105), now(), &limits(), false);
        assert_eq!(result, Some(ExitTrigger::TpHit));
    }

    #[test]
    fn sl_hit_for_short_is_price_above_sl() {
        let mut pos = base_position(1, now());
        pos.direction = Direction::Short;
        pos.sl_price = Some(dec!(104));
        pos.tp_price = Some(dec!(98));
        let result = evaluate_exit(&pos, dec!(105), now(), &limits(), false);
        assert_eq!(result, Some(ExitTrigger::SlHit));
    }

    #[test]
    fn news_blackout_only_fires_between_sl_tp_and_time_checks() {
        let pos = base_position(1, now());
        let result = evaluate_exit(&pos, dec!(100.5), now(), &limits(), true);
        assert_eq!(result, Some(ExitTrigger::NewsBlackout));
    }

    #[test]
    fn time_exit_at_max_hold_minutes() {
        let pos = base_position(10, now());
        let result = evaluate_exit(&pos, dec!(100.5), now(), &limits(), false);
        assert_eq!(result, Some(ExitTrigger::TimeExit));
    }

    #[test]
    fn no_trigger_before_fast_exit_window_with_flat_pnl() {
        let pos = base_position(2, now());
        let result = evaluate_exit(&pos, dec!(100.1), now(), &limits(), false);
        assert_eq!(result, None);
    }

    #[test]
    fn fast_discard_after_minimum_hold_with_flat_pnl() {
        let pos = base_position(3, now());
        // entry 100, mark 100.2 -> 0.2% move, below the 0.3% threshold
        let result = evaluate_exit(&pos, dec!(100.2), now(), &limits(), false);
        assert_eq!(result, Some(ExitTrigger::FastDiscard));
    }

    #[test]
    fn no_fast_discard_when_pnl_move_exceeds_threshold() {
        let pos = base_position(3, now());
        // entry 100, mark 100.5 -> 0.5% move, above the 0.3% threshold, and
        // still short of the 10-minute time exit.
        let result = evaluate_exit(&pos, dec!(100.5), now(), &limits(), false);
        assert_eq!(result, None);
    }

    #[test]
    fn missing_entry_price_yields_no_trigger_rather_than_panic() {
        let mut pos = base_position(5, now());
        pos.sl_price = None;
        let result = evaluate_exit(&pos, dec!(100), now(), &limits(), false);
        assert_eq!(result, None);
    }
}
