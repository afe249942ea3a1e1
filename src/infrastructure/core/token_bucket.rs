use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A simple token bucket shared by every outbound call site against a
/// single venue (spec.md §4.2: "the gateway serializes outbound requests
/// through a token bucket sized to 90% of the venue's published limit").
/// One instance per venue, not per endpoint.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState { tokens: capacity as f64, last_refill: Instant::now() }),
        }
    }

    /// Sized to 90% of a venue's published per-second rate limit.
    pub fn at_ninety_percent_of(venue_limit_per_sec: u32) -> Self {
        let capacity = ((venue_limit_per_sec as f64) * 0.9).floor().max(1.0) as u32;
        Self::new(capacity, capacity as f64)
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    /// Waits (up to `max_wait`) for a single token to become available.
    /// Returns `false` if `max_wait` elapses first (spec.md §4.2: "requests
    /// wait up to 2 s; beyond that, UNAVAILABLE").
    pub async fn acquire(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                Self::refill(&mut state, self.capacity, self.refill_per_sec);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_when_tokens_available() {
        let bucket = TokenBucket::new(5, 5.0);
        assert!(bucket.acquire(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn times_out_when_exhausted_and_refill_too_slow() {
        let bucket = TokenBucket::new(1, 0.001);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
        assert!(!bucket.acquire(Duration::from_millis(50)).await);
    }
}
