//! A single retry combinator parameterized by predicate, backoff schedule,
//! and attempt budget, consolidating the retry loops that would otherwise be
//! scattered across the gateway and the ledger client.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// A fixed schedule of delays, one per retry attempt (not counting the
/// first, un-delayed attempt). `jitter` adds up to +/-25% uniform noise to
/// each delay so concurrent callers don't retry in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    pub delays: Vec<Duration>,
    pub jitter: bool,
}

impl BackoffSchedule {
    pub fn fixed(delays: impl Into<Vec<Duration>>) -> Self {
        Self { delays: delays.into(), jitter: true }
    }

    fn delay_for(&self, attempt: usize) -> Option<Duration> {
        let base = *self.delays.get(attempt)?;
        if !self.jitter {
            return Some(base);
        }
        let mut rng = rand::rng();
        let factor = rng.random_range(0.75..1.25);
        Some(Duration::from_secs_f64(base.as_secs_f64() * factor))
    }

    /// Maximum number of attempts this schedule allows (retries + 1).
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

/// Runs `op` up to `schedule.max_attempts()` times. `should_retry` decides,
/// given an error, whether another attempt is warranted; when it returns
/// false the error is returned immediately. Retries sleep for
/// `schedule.delay_for(attempt)` between attempts.
pub async fn retry_with_backoff<T, E, Op, Fut, ShouldRetry>(
    schedule: &BackoffSchedule,
    mut op: Op,
    should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < schedule.max_attempts() && should_retry(&err) => {
                if let Some(delay) = schedule.delay_for(attempt) {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
