use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::symbol::Symbol;

/// A single-symbol snapshot from the venue's 24h ticker feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub quote_volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}
