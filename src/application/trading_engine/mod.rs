pub mod engine;
pub mod sizing;

pub use engine::{CandidateOutcome, TradingEngine};
