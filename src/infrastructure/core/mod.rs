pub mod backoff;
pub mod http_client_factory;
pub mod token_bucket;

pub use backoff::{retry_with_backoff, BackoffSchedule};
pub use http_client_factory::build_http_client;
pub use token_bucket::TokenBucket;
