pub mod candidate;
pub mod direction;
pub mod position;

pub use candidate::{Candidate, SkipReason};
pub use direction::Direction;
pub use position::{Position, PositionStatus};
