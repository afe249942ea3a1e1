use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// Builds the shared HTTP client used by every exchange gateway
/// implementation. Transport-level transient failures (connection resets,
/// timeouts) are retried by `reqwest-retry`'s middleware; venue-logical
/// failures (rate limiting, 5xx with a body the gateway needs to inspect)
/// are handled one layer up, by the gateway's own retry combinator.
pub fn build_http_client(request_timeout: Duration) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
    let reqwest_client = reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .expect("reqwest client configuration is static and always valid");

    ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}
