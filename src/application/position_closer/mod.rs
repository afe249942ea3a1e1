pub mod closer;
pub mod exit_rules;

pub use closer::{NewsBlackoutFeed, NoBlackoutFeed, PositionCloser};
pub use exit_rules::{evaluate_exit, ExitTrigger};
