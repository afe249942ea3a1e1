pub mod reconciler;
pub mod retry;

pub use reconciler::Reconciler;
pub use retry::retry_contended;
