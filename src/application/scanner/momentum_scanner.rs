use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::application::market_data::MarketDataGateway;
use crate::application::scanner::session_boost::{apply_session_boost, night_pump_signal};
use crate::config::{SessionAffinityTable, UniverseFilterConfig};
use crate::domain::errors::ScannerError;
use crate::domain::market::candle::Interval;
use crate::domain::market::indicators::{atr, ema_series};
use crate::domain::symbol::Symbol;
use crate::domain::trading::candidate::Candidate;
use crate::domain::trading::direction::Direction;

pub struct ScannerThresholds {
    pub min_atr_pct_1min: Decimal,
    pub vol_ratio_min: Decimal,
    pub thrust_min_pct: Decimal,
    pub prefilter_top_k: usize,
    pub min_momentum_score: u8,
    pub tp_mult: Decimal,
    pub sl_mult: Decimal,
}

struct PrefilterSurvivor {
    symbol: Symbol,
    mobility_rank: Decimal,
}

/// Four-phase scan pipeline (spec.md §4.3): universe filter, lightweight
/// pre-filter, deep analysis scoring, candidate emission.
pub struct MomentumScanner {
    gateway: Arc<MarketDataGateway>,
    universe: UniverseFilterConfig,
    sessions: SessionAffinityTable,
    thresholds: ScannerThresholds,
}

impl MomentumScanner {
    pub fn new(gateway: Arc<MarketDataGateway>, universe: UniverseFilterConfig, sessions: SessionAffinityTable, thresholds: ScannerThresholds) -> Self {
        Self { gateway, universe, sessions, thresholds }
    }

    pub async fn scan(&self, available_slots: usize) -> Result<Vec<Candidate>, ScannerError> {
        if available_slots == 0 {
            return Ok(Vec::new());
        }

        let survivors = self.phase1_and_2().await?;
        debug!(count = survivors.len(), "phase 1+2 survivors");

        let mut candidates = Vec::new();
        for survivor in &survivors {
            if let Some(candidate) = self.phase3_analyze(survivor).await {
                candidates.push(candidate);
            }
        }

        let emitted = self.phase4_emit(candidates, available_slots);
        info!(count = emitted.len(), "scanner emitted candidates");
        Ok(emitted)
    }

    /// Phases 1-2 combined: universe filter then lightweight mobility check.
    async fn phase1_and_2(&self) -> Result<Vec<PrefilterSurvivor>, ScannerError> {
        let tickers = self.gateway.tickers().await?;

        let mut universe: Vec<Symbol> = tickers
            .values()
            .filter(|t| t.quote_volume_24h >= dec!(5_000_000))
            .filter(|t| self.universe.is_allowed(&t.symbol))
            .map(|t| t.symbol.clone())
            .collect();
        universe.sort();

        let mut survivors = Vec::new();
        for symbol in &universe {
            let candles = match self.gateway.candles(symbol, Interval::OneMinute).await {
                Ok(c) => c,
                Err(_) => continue, // spec.md §4.2: treat as unscanned for the tick
            };
            if candles.len() < 26 {
                continue;
            }
            let window = &candles[candles.len() - 25..];

            let Some(candle_atr) = atr(window, 10) else { continue };
            let last_close = window.last().unwrap().close;
            if last_close.is_zero() {
                continue;
            }
            let atr_pct = candle_atr / last_close * dec!(100);
            if atr_pct < self.thresholds.min_atr_pct_1min {
                continue;
            }

            let recent_vol: Decimal = window[window.len() - 3..].iter().map(|c| c.volume).sum::<Decimal>() / dec!(3);
            let prior_vol: Decimal = window[window.len() - 23..window.len() - 3].iter().map(|c| c.volume).sum::<Decimal>() / dec!(20);
            if prior_vol.is_zero() {
                continue;
            }
            let vol_ratio = recent_vol / prior_vol;
            if vol_ratio < self.thresholds.vol_ratio_min {
                continue;
            }

            let close_now = window.last().unwrap().close;
            let close_6_ago = window[window.len() - 6].close;
            if close_6_ago.is_zero() {
                continue;
            }
            let thrust = (close_now - close_6_ago).abs() / close_6_ago * dec!(100);
            if thrust < self.thresholds.thrust_min_pct {
                continue;
            }

            let mobility_rank = atr_pct * vol_ratio * thrust;
            survivors.push(PrefilterSurvivor { symbol: symbol.clone(), mobility_rank });
        }

        survivors.sort_by(|a, b| b.mobility_rank.cmp(&a.mobility_rank));
        survivors.truncate(self.thresholds.prefilter_top_k);
        Ok(survivors)
    }

    /// Phase 3: deep analysis and scoring for a single survivor.
    async fn phase3_analyze(&self, survivor: &PrefilterSurvivor) -> Option<Candidate> {
        let candles = self.gateway.candles(&survivor.symbol, Interval::OneMinute).await.ok()?;
        if candles.len() < 60 {
            return None;
        }
        let window = &candles[candles.len() - 60..];
        let closes: Vec<Decimal> = window.iter().map(|c| c.close).collect();

        let ema_fast = ema_series(&closes, 5);
        let ema_slow = ema_series(&closes, 13);
        let n = ema_fast.len();

        let crossover = if n >= 2 {
            if ema_fast[n - 2] <= ema_slow[n - 2] && ema_fast[n - 1] > ema_slow[n - 1] {
                Some(Direction::Long)
            } else if ema_fast[n - 2] >= ema_slow[n - 2] && ema_fast[n - 1] < ema_slow[n - 1] {
                Some(Direction::Short)
            } else {
                None
            }
        } else {
            None
        };

        let recent_vol: Decimal = window[window.len() - 3..].iter().map(|c| c.volume).sum::<Decimal>() / dec!(3);
        let prior_vol: Decimal = window[window.len() - 20..window.len() - 3].iter().map(|c| c.volume).sum::<Decimal>() / dec!(17);
        let volume_ratio = if prior_vol.is_zero() { Decimal::ZERO } else { recent_vol / prior_vol };

        let candle_atr = atr(window, 14)?;
        let last_close = closes[closes.len() - 1];
        if last_close.is_zero() {
            return None;
        }
        let atr_pct = candle_atr / last_close * dec!(100);

        let night_pump = night_pump_signal(window, volume_ratio);

        let (direction, mut score) = if let Some((direction, pump_mult)) = night_pump {
            let mut base = self.score_without_crossover_gate(window, direction, volume_ratio, atr_pct);
            base = (Decimal::from(base) * pump_mult).round().to_u8().unwrap_or(100);
            (direction, base)
        } else {
            let direction = crossover?;
            if atr_pct < dec!(0.10) {
                return None;
            }
            let mut s: i32 = 40;
            let price_change_3 = (closes[closes.len() - 1] - closes[closes.len() - 4]) / closes[closes.len() - 4];
            if direction.sign_matches(price_change_3) {
                s += 20;
            }
            s += Self::volume_ratio_bonus(volume_ratio);
            if atr_pct >= dec!(0.15) {
                s += 15;
            }
            (direction, s.clamp(0, 100) as u8)
        };

        score = apply_session_boost(score, &survivor.symbol, Utc::now(), &self.sessions);
        if score < self.min_momentum_score_floor() {
            return None;
        }

        let tp_offset = self.thresholds.tp_mult * candle_atr;
        let sl_offset = self.thresholds.sl_mult * candle_atr;
        let (suggested_tp, suggested_sl) = match direction {
            Direction::Long => (last_close + tp_offset, last_close - sl_offset),
            Direction::Short => (last_close - tp_offset, last_close + sl_offset),
        };

        Some(Candidate {
            symbol: survivor.symbol.clone(),
            direction,
            score,
            price: last_close,
            atr: candle_atr,
            suggested_tp,
            suggested_sl,
            snapshot_time: Utc::now(),
            mobility_rank: survivor.mobility_rank,
        })
    }

    fn min_momentum_score_floor(&self) -> u8 {
        self.thresholds.min_momentum_score
    }

    fn volume_ratio_bonus(volume_ratio: Decimal) -> i32 {
        if volume_ratio >= dec!(2.0) {
            35
        } else if volume_ratio >= dec!(1.5) {
            25
        } else if volume_ratio >= dec!(1.2) {
            15
        } else if volume_ratio < dec!(1.0) {
            -20
        } else {
            0
        }
    }

    /// Scores a night-pump candidate without requiring a crossover, reusing
    /// the same volume/ATR bonus structure (spec.md §9: night-pump bypasses
    /// the crossover gate but the rest of the scoring still applies).
    fn score_without_crossover_gate(
        &self,
        window: &[crate::domain::market::candle::Candle],
        direction: Direction,
        volume_ratio: Decimal,
        atr_pct: Decimal,
    ) -> u8 {
        let closes: Vec<Decimal> = window.iter().map(|c| c.close).collect();
        let mut s: i32 = 40;
        if closes.len() >= 4 && closes[closes.len() - 4] != Decimal::ZERO {
            let price_change_3 = (closes[closes.len() - 1] - closes[closes.len() - 4]) / closes[closes.len() - 4];
            if direction.sign_matches(price_change_3) {
                s += 20;
            }
        }
        s += Self::volume_ratio_bonus(volume_ratio);
        if atr_pct >= dec!(0.15) {
            s += 15;
        }
        s.clamp(0, 100) as u8
    }

    /// Phase 4: threshold, sort, and cap to the available slot budget.
    fn phase4_emit(&self, mut candidates: Vec<Candidate>, available_slots: usize) -> Vec<Candidate> {
        candidates.retain(|c| c.score >= self.thresholds.min_momentum_score);
        candidates.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => b.mobility_rank.cmp(&a.mobility_rank),
            other => other,
        });
        candidates.truncate(available_slots);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::mock::MockExchangeGateway;
    use chrono::{DateTime, TimeZone};

    fn thresholds() -> ScannerThresholds {
        ScannerThresholds {
            min_atr_pct_1min: dec!(0.25),
            vol_ratio_min: dec!(1.3),
            thrust_min_pct: dec!(0.20),
            prefilter_top_k: 50,
            min_momentum_score: 60,
            tp_mult: dec!(2.0),
            sl_mult: dec!(1.0),
        }
    }

    fn candle(close: Decimal, volume: Decimal, t: i64, base: DateTime<Utc>) -> crate::domain::market::candle::Candle {
        crate::domain::market::candle::Candle {
            open_time: base + chrono::Duration::minutes(t),
            open: close,
            high: close + dec!(0.1),
            low: close - dec!(0.1),
            close,
            volume,
        }
    }

    fn scanner_with(mock: Arc<MockExchangeGateway>) -> MomentumScanner {
        let gateway = Arc::new(MarketDataGateway::new(mock, 2400));
        MomentumScanner::new(
            gateway,
            UniverseFilterConfig { quote_allowlist: vec!["USDT".into()], symbol_denylist: vec![] },
            SessionAffinityTable::default(),
            thresholds(),
        )
    }

    #[tokio::test]
    async fn s1_happy_path_long_emits_expected_candidate() {
        let mock = Arc::new(MockExchangeGateway::new());
        let symbol = Symbol::new("XUSDT");
        mock.seed_ticker(crate::domain::market::ticker::Ticker {
            symbol: symbol.clone(),
            last_price: dec!(101.2),
            quote_volume_24h: dec!(10_000_000),
            timestamp: Utc::now(),
        });

        let base = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        // 60 candles: a sustained base, a volume surge in the last 3, and a
        // crossover forming at the very end; flat enough elsewhere that
        // thrust/ATR still clear the phase-2 floor.
        let mut candles = Vec::new();
        for i in 0..54 {
            candles.push(candle(dec!(100) + Decimal::from(i % 3) * dec!(0.05), dec!(100), i as i64, base));
        }
        candles.push(candle(dec!(100.2), dec!(100), 54, base));
        candles.push(candle(dec!(100.1), dec!(100), 55, base));
        candles.push(candle(dec!(100.0), dec!(100), 56, base));
        candles.push(candle(dec!(100.0), dec!(220), 57, base));
        candles.push(candle(dec!(100.5), dec!(230), 58, base));
        candles.push(candle(dec!(101.2), dec!(240), 59, base));

        mock.seed_candles(&symbol, Interval::OneMinute, candles);
        let scanner = scanner_with(mock);

        let candidates = scanner.scan(3).await.unwrap();
        assert!(candidates.iter().any(|c| c.symbol == symbol), "expected XUSDT to be emitted: {candidates:?}");
        let candidate = candidates.iter().find(|c| c.symbol == symbol).unwrap();
        assert_eq!(candidate.direction, Direction::Long);
    }

    #[tokio::test]
    async fn zero_candidates_when_volume_ratio_fails_despite_high_atr() {
        let mock = Arc::new(MockExchangeGateway::new());
        let symbol = Symbol::new("YUSDT");
        mock.seed_ticker(crate::domain::market::ticker::Ticker {
            symbol: symbol.clone(),
            last_price: dec!(100),
            quote_volume_24h: dec!(10_000_000),
            timestamp: Utc::now(),
        });

        let base = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        // High swing (big ATR) but perfectly flat volume -> vol_ratio == 1.0 < 1.3.
        let candles: Vec<_> = (0..60)
            .map(|i| {
                let close = if i % 2 == 0 { dec!(95) } else { dec!(105) };
                candle(close, dec!(100), i as i64, base)
            })
            .collect();
        mock.seed_candles(&symbol, Interval::OneMinute, candles);
        let scanner = scanner_with(mock);

        let candidates = scanner.scan(3).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn zero_available_slots_short_circuits() {
        let mock = Arc::new(MockExchangeGateway::new());
        let scanner = scanner_with(mock);
        let result = scanner.scan(0).await.unwrap();
        assert!(result.is_empty());
    }
}
