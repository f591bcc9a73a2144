//! Rate-limited work queue.
//!
//! # Responsibilities
//! - Hold pending work item keys without duplicates
//! - Guarantee a key is never processed by two workers at once
//! - Re-add failed keys after a per-key exponential delay
//!
//! # Item States
//! ```text
//! add → dirty+queued → get → processing → done → (re-queued if dirty again)
//! ```
//!
//! # Design Decisions
//! - A key added while processing is deferred until `done`
//! - At most one delayed re-add is pending per key, at the earliest ready time
//! - Retry delay is the max of per-key backoff and an overall token bucket
//! - After shutdown, `get` drains what is queued and then returns `None`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::{calculate_backoff, TokenBucket};

/// Computes retry delays for failing keys.
pub struct RateLimiter {
    failures: Mutex<HashMap<String, u32>>,
    base_delay: Duration,
    max_delay: Duration,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration, qps: f64, burst: u32) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
            bucket: TokenBucket::new(qps, burst),
        }
    }

    /// Record another failure for `key` and return how long to wait before retrying.
    pub fn when(&self, key: &str) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock().expect("rate limiter mutex poisoned");
            let count = failures.entry(key.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let per_item = calculate_backoff(attempt, self.base_delay, self.max_delay);
        per_item.max(self.bucket.reserve())
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &str) {
        self.failures
            .lock()
            .expect("rate limiter mutex poisoned")
            .remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .expect("rate limiter mutex poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Ready time of the pending delayed re-add per key.
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: RateLimiter,
}

/// Deduplicating, rate-limited queue of work item keys. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner.state.lock().expect("work queue mutex poisoned")
    }

    /// Mark `key` as needing processing.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        {
            let mut state = self.state();
            if state.shutting_down || !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
            metrics::record_queue_depth(state.queue.len());
        }
        self.inner.notify.notify_waiters();
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(pending) if *pending <= ready_at => return,
                _ => {
                    state.waiting.insert(key.clone(), ready_at);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            {
                let mut state = queue.state();
                // Superseded by an earlier re-add of the same key.
                if state.waiting.get(&key) != Some(&ready_at) {
                    return;
                }
                state.waiting.remove(&key);
            }
            queue.add(key);
        });
    }

    /// Add `key` after the rate limiter says it is ok.
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let delay = self.inner.limiter.when(&key);
        tracing::debug!(key = %key, delay = ?delay, "Requeuing work item");
        self.add_after(key, delay);
    }

    /// Stop tracking retries for `key`.
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Number of times `key` has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::record_queue_depth(state.queue.len());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as finished; re-queues it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
