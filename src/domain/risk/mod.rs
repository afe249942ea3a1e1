pub mod accumulator;
pub mod limits;

pub use accumulator::RiskAccumulator;
pub use limits::RiskLimits;
