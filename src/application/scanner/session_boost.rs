use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::config::SessionAffinityTable;
use crate::domain::market::candle::Candle;
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;

/// Applies the time-of-day session boost, capping the result at 100
/// uniformly (spec.md §9 Open Question: "this spec caps at 100 uniformly").
pub fn apply_session_boost(base_score: u8, symbol: &Symbol, now: DateTime<Utc>, table: &SessionAffinityTable) -> u8 {
    let multiplier = table.multiplier_for(symbol, now);
    let boosted = Decimal::from(base_score) * multiplier;
    boosted.round().to_u8().unwrap_or(100).min(100)
}

/// Night-pump signal: a large, volume-confirmed, short-horizon move that
/// bypasses the crossover gate (spec.md §9 Open Question: "this spec lets
/// night-pump bypass the crossover requirement"). `candles` must be ordered
/// ascending and contain at least 16 bars (need a 15-minute lookback).
pub fn night_pump_signal(candles: &[Candle], vol_ratio: Decimal) -> Option<(Direction, Decimal)> {
    if candles.len() < 16 {
        return None;
    }
    let last = candles.last()?.close;
    let five_ago = candles[candles.len() - 6].close;
    let fifteen_ago = candles[candles.len() - 16].close;

    if five_ago.is_zero() || fifteen_ago.is_zero() {
        return None;
    }

    let five_min_move = (last - five_ago).abs() / five_ago;
    let fifteen_min_move = (last - fifteen_ago).abs() / fifteen_ago;

    let big_move = five_min_move > dec!(0.005);
    let volume_confirmed = vol_ratio > dec!(3.0);
    let accelerating = five_min_move > fifteen_min_move * dec!(2.0);

    if big_move && volume_confirmed && accelerating {
        Some((Direction::from_price_delta(last - five_ago), dec!(1.5)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_boost_caps_at_100() {
        let table = SessionAffinityTable {
            windows: vec![crate::config::session_affinity::SessionWindow {
                name: "Asia".into(),
                start_hour_utc: 0,
                end_hour_utc: 8,
                multiplier: dec!(2.0),
            }],
            affinities: {
                let mut m = std::collections::HashMap::new();
                m.insert("Asia".to_string(), std::collections::HashSet::from(["BTCUSDT".to_string()]));
                m
            },
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(apply_session_boost(90, &Symbol::new("BTCUSDT"), now, &table), 100);
    }

    #[test]
    fn session_boost_no_affinity_is_unchanged() {
        let table = SessionAffinityTable::default();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(apply_session_boost(70, &Symbol::new("BTCUSDT"), now, &table), 70);
    }

    fn candle(close: Decimal, t: i64, base: DateTime<Utc>) -> Candle {
        Candle { open_time: base + chrono::Duration::minutes(t), open: close, high: close, low: close, close, volume: dec!(1) }
    }

    #[test]
    fn night_pump_detected_on_large_accelerating_volume_confirmed_move() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // idx0 (15-min-ago ref) = 100, idx10 (5-min-ago ref) = 96, idx15 (last) = 102:
        // 5-min move = 6.25%, 15-min move = 2% -> accelerating and past the 0.5% floor.
        let closes = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 96.0, 96.0, 96.0, 96.0, 96.0, 102.0];
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| candle(Decimal::try_from(*c).unwrap(), i as i64, base))
            .collect();
        let result = night_pump_signal(&candles, dec!(4.0));
        assert!(result.is_some());
        assert_eq!(result.unwrap().0, Direction::Long);
    }

    #[test]
    fn night_pump_not_detected_on_small_move() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..16).map(|i| candle(dec!(100), i, base)).collect();
        assert!(night_pump_signal(&candles, dec!(4.0)).is_none());
    }
}
