use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::symbol::Symbol;

/// A named UTC trading session window with its boost multiplier.
#[derive(Debug, Clone)]
pub struct SessionWindow {
    pub name: String,
    pub start_hour_utc: u32,
    pub end_hour_utc: u32,
    pub multiplier: Decimal,
}

impl SessionWindow {
    fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour_utc && hour < self.end_hour_utc
    }
}

/// Data-driven session affinity configuration (spec.md §4.3: "Affinity
/// tables are data-driven configuration; the algorithm does not hard-code
/// symbol lists"). `affinities` maps a session name to the set of symbols
/// that get that session's boost multiplier; a symbol with no matching
/// affinity in any active session gets the default 1.0 multiplier.
///
/// When more than one session window is simultaneously active (the default
/// windows overlap, e.g. 07:00-08:00 is both "Asia" and "Europe"), the
/// highest multiplier among sessions the symbol has affinity for wins.
#[derive(Debug, Clone)]
pub struct SessionAffinityTable {
    pub windows: Vec<SessionWindow>,
    pub affinities: HashMap<String, HashSet<String>>,
}

impl Default for SessionAffinityTable {
    fn default() -> Self {
        Self {
            windows: vec![
                SessionWindow { name: "Asia".into(), start_hour_utc: 0, end_hour_utc: 8, multiplier: dec!(2.0) },
                SessionWindow { name: "Europe".into(), start_hour_utc: 7, end_hour_utc: 16, multiplier: dec!(1.8) },
                SessionWindow { name: "US".into(), start_hour_utc: 13, end_hour_utc: 22, multiplier: dec!(2.0) },
            ],
            affinities: HashMap::new(),
        }
    }
}

impl SessionAffinityTable {
    pub fn multiplier_for(&self, symbol: &Symbol, now: DateTime<Utc>) -> Decimal {
        let hour = now.hour();
        self.windows
            .iter()
            .filter(|w| w.contains(hour))
            .filter(|w| {
                self.affinities
                    .get(&w.name)
                    .is_some_and(|symbols| symbols.contains(symbol.as_str()))
            })
            .map(|w| w.multiplier)
            .max()
            .unwrap_or(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn symbol_with_no_affinity_gets_default_multiplier() {
        let table = SessionAffinityTable::default();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(table.multiplier_for(&Symbol::new("BTCUSDT"), now), Decimal::ONE);
    }

    #[test]
    fn symbol_with_affinity_gets_session_multiplier() {
        let mut table = SessionAffinityTable::default();
        table.affinities.insert("Asia".into(), HashSet::from(["BTCUSDT".to_string()]));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(table.multiplier_for(&Symbol::new("BTCUSDT"), now), dec!(2.0));
    }

    #[test]
    fn overlapping_sessions_pick_highest_multiplier() {
        let mut table = SessionAffinityTable::default();
        table.affinities.insert("Asia".into(), HashSet::from(["BTCUSDT".to_string()]));
        table.affinities.insert("Europe".into(), HashSet::from(["BTCUSDT".to_string()]));
        // 07:30 UTC is within both Asia [0,8) and Europe [7,16)
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 7, 30, 0).unwrap();
        assert_eq!(table.multiplier_for(&Symbol::new("BTCUSDT"), now), dec!(2.0));
    }
}
