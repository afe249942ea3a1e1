use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a perpetual futures instrument (e.g. "BTCUSDT").
///
/// Treated as a flat namespace everywhere in the control plane; no base/quote
/// decomposition is needed outside the universe filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quote asset suffix, used by the universe filter's allowlist check.
    /// Assumes the common exchange convention of no separator (e.g. "BTCUSDT").
    pub fn quote_asset<'a>(&'a self, known_quotes: &[&'a str]) -> Option<&'a str> {
        known_quotes
            .iter()
            .find(|q| self.0.ends_with(*q) && self.0.len() > q.len())
            .copied()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_asset_matches_known_suffix() {
        let sym = Symbol::new("BTCUSDT");
        assert_eq!(sym.quote_asset(&["USDT", "USDC"]), Some("USDT"));
    }

    #[test]
    fn quote_asset_none_when_unmatched() {
        let sym = Symbol::new("BTCEUR");
        assert_eq!(sym.quote_asset(&["USDT", "USDC"]), None);
    }
}
