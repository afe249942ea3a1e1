use crate::domain::symbol::Symbol;

/// Phase 1 universe filter configuration (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct UniverseFilterConfig {
    pub quote_allowlist: Vec<String>,
    pub symbol_denylist: Vec<String>,
}

impl UniverseFilterConfig {
    pub fn is_allowed(&self, symbol: &Symbol) -> bool {
        if self.symbol_denylist.iter().any(|d| d == symbol.as_str()) {
            return false;
        }
        let quotes: Vec<&str> = self.quote_allowlist.iter().map(String::as_str).collect();
        symbol.quote_asset(&quotes).is_some()
    }
}
