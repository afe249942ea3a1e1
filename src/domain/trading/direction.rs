use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a perpetual futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// True if `observed` moves in the profitable direction for this side.
    pub fn sign_matches(&self, delta: rust_decimal::Decimal) -> bool {
        match self {
            Direction::Long => delta.is_sign_positive(),
            Direction::Short => delta.is_sign_negative(),
        }
    }

    pub fn from_price_delta(delta: rust_decimal::Decimal) -> Self {
        if delta.is_sign_negative() {
            Direction::Short
        } else {
            Direction::Long
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}
