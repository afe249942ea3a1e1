//! Environment-resolved configuration surface (spec.md §6 plus the ambient
//! keys SPEC_FULL.md §6 adds). Everything has a documented default and is
//! validated once at startup; a malformed value fails fast with context
//! rather than silently falling back.

pub mod session_affinity;
pub mod universe;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::risk::RiskLimits;
pub use session_affinity::SessionAffinityTable;
pub use universe::UniverseFilterConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub capital: Decimal,
    pub max_open_trades: u32,
    pub min_volume_24h: Decimal,
    pub min_momentum_score: u8,
    pub tp_mult: Decimal,
    pub sl_mult: Decimal,
    pub max_hold_minutes: i64,
    pub fast_exit_minutes: i64,
    pub fast_exit_threshold: Decimal,
    pub max_loss_per_trade: Decimal,
    pub max_portfolio_risk: Decimal,
    pub daily_loss_limit: Decimal,
    pub live_mode: bool,
    pub news_blackout_window_min: i64,

    // Ambient
    pub database_url: String,
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_base_url: String,
    pub log_format: String,
    pub closer_worker_offsets_sec: Vec<i64>,
    pub min_atr_pct_1min: Decimal,
    pub vol_ratio_min: Decimal,
    pub thrust_min_pct: Decimal,
    pub prefilter_top_k: usize,
    pub universe: UniverseFilterConfig,
    pub pending_order_timeout_sec: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            capital: parse_decimal("CAPITAL", "10000")?,
            max_open_trades: parse_u32("MAX_OPEN_TRADES", "3")?,
            min_volume_24h: parse_decimal("MIN_VOLUME_24H", "5000000")?,
            min_momentum_score: parse_u8("MIN_MOMENTUM_SCORE", "60")?,
            tp_mult: parse_decimal("TP_MULT", "2.0")?,
            sl_mult: parse_decimal("SL_MULT", "1.0")?,
            max_hold_minutes: parse_i64("MAX_HOLD_MINUTES", "10")?,
            fast_exit_minutes: parse_i64("FAST_EXIT_MINUTES", "3")?,
            fast_exit_threshold: parse_decimal("FAST_EXIT_THRESHOLD", "0.003")?,
            max_loss_per_trade: parse_decimal("MAX_LOSS_PER_TRADE", "0.02")?,
            max_portfolio_risk: parse_decimal("MAX_PORTFOLIO_RISK", "0.20")?,
            daily_loss_limit: parse_decimal("DAILY_LOSS_LIMIT", "0.05")?,
            live_mode: parse_bool("LIVE_MODE", "false")?,
            news_blackout_window_min: parse_i64("NEWS_BLACKOUT_WINDOW_MIN", "10")?,

            database_url: parse_string("DATABASE_URL", "sqlite://./data/engine.db"),
            binance_api_key: parse_string("BINANCE_API_KEY", ""),
            binance_api_secret: parse_string("BINANCE_API_SECRET", ""),
            binance_base_url: parse_string("BINANCE_BASE_URL", "https://fapi.binance.com"),
            log_format: parse_string("LOG_FORMAT", "pretty"),
            closer_worker_offsets_sec: parse_i64_list("CLOSER_WORKER_OFFSETS_SEC", "0,10,20")?,
            min_atr_pct_1min: parse_decimal("MIN_ATR_PCT_1MIN", "0.25")?,
            vol_ratio_min: parse_decimal("VOL_RATIO_MIN", "1.3")?,
            thrust_min_pct: parse_decimal("THRUST_MIN_PCT", "0.20")?,
            prefilter_top_k: parse_usize("PREFILTER_TOP_K", "50")?,
            universe: UniverseFilterConfig {
                quote_allowlist: parse_string_list("QUOTE_ALLOWLIST", "USDT"),
                symbol_denylist: parse_string_list("SYMBOL_DENYLIST", ""),
            },
            pending_order_timeout_sec: parse_u64("PENDING_ORDER_TIMEOUT_SEC", "10")?,
        })
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            capital: self.capital,
            max_open_trades: self.max_open_trades,
            max_portfolio_risk: self.max_portfolio_risk,
            daily_loss_limit: self.daily_loss_limit,
            max_loss_per_trade: self.max_loss_per_trade,
            max_hold_minutes: self.max_hold_minutes,
            fast_exit_minutes: self.fast_exit_minutes,
            fast_exit_threshold: self.fast_exit_threshold,
            news_blackout_window_min: self.news_blackout_window_min,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.live_mode && (self.binance_api_key.is_empty() || self.binance_api_secret.is_empty()) {
            anyhow::bail!("LIVE_MODE=true requires BINANCE_API_KEY and BINANCE_API_SECRET");
        }
        if self.max_open_trades == 0 {
            anyhow::bail!("MAX_OPEN_TRADES must be >= 1");
        }
        Ok(())
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_string(key: &str, default: &str) -> String {
    env_or_default(key, default)
}

fn parse_string_list(key: &str, default: &str) -> Vec<String> {
    env_or_default(key, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_generic<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env_or_default(key, default);
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {raw:?} ({e})"))
        .context(format!("parsing environment variable {key}"))
}

fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    parse_generic(key, default)
}

fn parse_u32(key: &str, default: &str) -> Result<u32> {
    parse_generic(key, default)
}

fn parse_u8(key: &str, default: &str) -> Result<u8> {
    parse_generic(key, default)
}

fn parse_u64(key: &str, default: &str) -> Result<u64> {
    parse_generic(key, default)
}

fn parse_usize(key: &str, default: &str) -> Result<usize> {
    parse_generic(key, default)
}

fn parse_i64(key: &str, default: &str) -> Result<i64> {
    parse_generic(key, default)
}

fn parse_bool(key: &str, default: &str) -> Result<bool> {
    parse_generic(key, default)
}

fn parse_i64_list(key: &str, default: &str) -> Result<Vec<i64>> {
    env_or_default(key, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| anyhow::anyhow!("invalid entry {s:?} in {key}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_env_vars() {
        // SAFETY: test-only, not run concurrently with other env mutation in this crate.
        for key in [
            "CAPITAL", "MAX_OPEN_TRADES", "MIN_VOLUME_24H", "MIN_MOMENTUM_SCORE",
            "TP_MULT", "SL_MULT", "MAX_HOLD_MINUTES", "FAST_EXIT_MINUTES",
            "FAST_EXIT_THRESHOLD", "MAX_LOSS_PER_TRADE", "MAX_PORTFOLIO_RISK",
            "DAILY_LOSS_LIMIT", "LIVE_MODE", "NEWS_BLACKOUT_WINDOW_MIN",
        ] {
            unsafe { std::env::remove_var(key) };
        }
        let cfg = EngineConfig::from_env().expect("defaults must parse");
        assert_eq!(cfg.capital, Decimal::from(10000));
        assert_eq!(cfg.max_open_trades, 3);
        assert!(!cfg.live_mode);
        assert_eq!(cfg.closer_worker_offsets_sec, vec![0, 10, 20]);
        assert_eq!(cfg.universe.quote_allowlist, vec!["USDT".to_string()]);
    }

    #[test]
    fn malformed_value_fails_with_context() {
        unsafe { std::env::set_var("MAX_OPEN_TRADES", "not-a-number") };
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_OPEN_TRADES") || format!("{err:#}").contains("MAX_OPEN_TRADES"));
        unsafe { std::env::remove_var("MAX_OPEN_TRADES") };
    }

    #[test]
    fn live_mode_without_credentials_fails_validation() {
        let cfg = EngineConfig {
            capital: Decimal::from(10000),
            max_open_trades: 3,
            min_volume_24h: Decimal::from(5_000_000),
            min_momentum_score: 60,
            tp_mult: Decimal::from(2),
            sl_mult: Decimal::from(1),
            max_hold_minutes: 10,
            fast_exit_minutes: 3,
            fast_exit_threshold: Decimal::new(3, 3),
            max_loss_per_trade: Decimal::new(2, 2),
            max_portfolio_risk: Decimal::new(20, 2),
            daily_loss_limit: Decimal::new(5, 2),
            live_mode: true,
            news_blackout_window_min: 10,
            database_url: "sqlite::memory:".into(),
            binance_api_key: "".into(),
            binance_api_secret: "".into(),
            binance_base_url: "https://fapi.binance.com".into(),
            log_format: "pretty".into(),
            closer_worker_offsets_sec: vec![0, 10, 20],
            min_atr_pct_1min: Decimal::new(25, 2),
            vol_ratio_min: Decimal::new(13, 1),
            thrust_min_pct: Decimal::new(20, 2),
            prefilter_top_k: 50,
            universe: UniverseFilterConfig {
                quote_allowlist: vec!["USDT".into()],
                symbol_denylist: vec![],
            },
            pending_order_timeout_sec: 10,
        };
        assert!(cfg.validate().is_err());
    }
}
