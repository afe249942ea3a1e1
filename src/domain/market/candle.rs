use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle interval supported by the gateway's candle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    OneHour,
    FourHours,
}

impl Interval {
    /// Cache depth per interval (spec.md §4.2: "N = 60 for 1m, 50 for others").
    pub fn cache_depth(&self) -> usize {
        match self {
            Interval::OneMinute => 60,
            _ => 50,
        }
    }

    pub fn as_venue_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_venue_str())
    }
}

/// One OHLCV bar. Series are ordered by `open_time` ascending, contiguous at
/// a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_depth_matches_spec_table() {
        assert_eq!(Interval::OneMinute.cache_depth(), 60);
        assert_eq!(Interval::FiveMinutes.cache_depth(), 50);
        assert_eq!(Interval::OneHour.cache_depth(), 50);
        assert_eq!(Interval::FourHours.cache_depth(), 50);
    }

    #[test]
    fn venue_str_round_trips_display() {
        assert_eq!(Interval::OneMinute.to_string(), "1m");
        assert_eq!(Interval::FourHours.to_string(), "4h");
    }
}
