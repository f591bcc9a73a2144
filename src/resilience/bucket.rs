//! Token bucket pacing.
//!
//! Unlike a rejecting limiter, every caller gets a token; the returned delay
//! says how long to wait before using it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// Shared token bucket with a refill rate and burst capacity.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a full bucket refilling `qps` tokens per second up to `burst`.
    pub fn new(qps: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
            capacity,
            refill_rate: qps,
        }
    }

    /// Take a token, returning how long the caller must wait before using it.
    pub fn reserve(&self) -> Duration {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();

        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_update = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.refill_rate)
        }
    }
}
