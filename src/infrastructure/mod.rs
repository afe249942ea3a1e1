pub mod core;
pub mod exchange;
pub mod observability;
pub mod persistence;
