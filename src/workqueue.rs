// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rate-limited work queue of namespaced keys.
//!
//! The queue is a set-of-keys FIFO with the "dirty / processing" bookkeeping
//! that guarantees at most one worker holds a key at a time:
//!
//! - `add` of a key already waiting is a no-op
//! - `add` of a key being processed marks it dirty; `done` re-queues it
//! - `get` hands the key to exactly one worker until `done`
//!
//! Delayed adds (`add_after`, `add_rate_limited`) are timers that call `add`
//! when they fire; a key already waiting for an earlier timer is not
//! scheduled twice.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudplane::workqueue::WorkQueue;
//!
//! # async fn example() {
//! let queue = WorkQueue::new("Vcn");
//! queue.add("ns/net-a");
//! while let Some(key) = queue.get().await {
//!     // reconcile `key`
//!     queue.forget(&key);
//!     queue.done(&key);
//! }
//! # }
//! ```

use crate::constants::{QUEUE_BASE_DELAY, QUEUE_BUCKET_BURST, QUEUE_BUCKET_QPS, QUEUE_MAX_DELAY};
use crate::metrics::set_queue_depth;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

// ============================================================================
// Rate limiters
// ============================================================================

/// Decides how long a key waits before it is re-added.
pub trait RateLimiter: Send + Sync {
    /// Delay for the next re-add of `key`; counts as one requeue.
    fn when(&self, key: &str) -> Duration;

    /// Reset the key's history.
    fn forget(&self, key: &str);

    /// Requeues since the last `forget`.
    fn num_requeues(&self, key: &str) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemExponentialFailureRateLimiter {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.to_string()).or_default();
        let exponent = *count;
        *count = count.saturating_add(1);

        // 2^31 * base overflows any sane cap; clamp early
        if exponent >= 31 {
            return self.max;
        }
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    fn forget(&self, key: &str) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or_default()
    }
}

/// Global token bucket shared by every key of a queue.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<(f64, Instant)>,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(qps: f64, burst: f64) -> Self {
        Self {
            qps,
            burst,
            state: Mutex::new((burst, Instant::now())),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut state = lock(&self.state);
        let (tokens, last) = &mut *state;
        let now = Instant::now();
        *tokens = (*tokens + now.duration_since(*last).as_secs_f64() * self.qps).min(self.burst);
        *last = now;

        // Reserve a token; a negative balance is the wait for it to refill
        *tokens -= 1.0;
        if *tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-*tokens / self.qps)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// The longest delay of several limiters.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or_default()
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or_default()
    }
}

/// Per-key exponential backoff (2s..1000s) combined with a 10 qps / 100 burst bucket.
#[must_use]
pub fn default_controller_rate_limiter() -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            QUEUE_BASE_DELAY,
            QUEUE_MAX_DELAY,
        )),
        Box::new(BucketRateLimiter::new(QUEUE_BUCKET_QPS, QUEUE_BUCKET_BURST)),
    ])
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// key → instant its pending delayed add fires
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    limiter: Box<dyn RateLimiter>,
}

/// Cloneable handle to a rate-limited work queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Queue with the default controller rate limiter.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_rate_limiter(name, Box::new(default_controller_rate_limiter()))
    }

    #[must_use]
    pub fn with_rate_limiter(name: &str, limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    /// Enqueue a key unless it is already waiting.
    pub fn add(&self, key: &str) {
        let depth = {
            let mut state = self.state();
            if state.shutting_down || !state.dirty.insert(key.to_string()) {
                return;
            }
            if state.processing.contains(key) {
                trace!(queue = %self.inner.name, key = %key, "key in flight, marked dirty");
                return;
            }
            state.queue.push_back(key.to_string());
            state.queue.len()
        };
        set_queue_depth(&self.inner.name, depth);
        self.inner.notify.notify_one();
    }

    /// Enqueue a key once `delay` has elapsed.
    pub fn add_after(&self, key: &str, delay: Duration) {
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
            if state.waiting.get(key).is_some_and(|at| *at <= ready_at) {
                return;
            }
            state.waiting.insert(key.to_string(), ready_at);
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            let fire = {
                let mut state = queue.state();
                if state.waiting.get(&key) == Some(&ready_at) {
                    state.waiting.remove(&key);
                    true
                } else {
                    false
                }
            };
            if fire {
                queue.add(&key);
            }
        });
    }

    /// Enqueue after the rate limiter's delay for this key.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.limiter.when(key);
        trace!(queue = %self.inner.name, key = %key, delay = ?delay, "rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    Some((key, state.queue.len()))
                } else if state.shutting_down {
                    return None;
                } else {
                    None
                }
            };
            if let Some((key, depth)) = taken {
                set_queue_depth(&self.inner.name, depth);
                return Some(key);
            }
            notified.await;
        }
    }

    /// Release a key taken with `get`; re-queues it when it was added meanwhile.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Reset the key's rate-limit history.
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Stop accepting keys. Workers drain what is queued, then `get` returns `None`.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.waiting.clear();
        }
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "workqueue_tests.rs"]
mod workqueue_tests;
