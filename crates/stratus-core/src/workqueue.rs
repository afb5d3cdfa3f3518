//! Rate-limited, deduplicating work queue
//!
//! Semantics:
//! - adding a key that is already queued collapses into one entry
//! - a key handed out by [`WorkQueue::get`] is not handed out again until
//!   [`WorkQueue::done`]; adds in the meantime are replayed on `done`
//! - [`WorkQueue::add_rate_limited`] delays by `base * 2^(failures-1)`, capped
//! - after [`WorkQueue::shut_down`], `get` returns `None` once the queue is empty

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Back-off settings for rate-limited requeues
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for the exponential delay
    pub max_delay: Duration,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl WorkQueueConfig {
    /// Delay for the given consecutive failure count (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    failures: DashMap<String, u32>,
    notify: Notify,
    config: WorkQueueConfig,
}

/// Shared work queue; clones refer to the same queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(config: WorkQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                failures: DashMap::new(),
                notify: Notify::new(),
                config,
            }),
        }
    }

    /// Enqueue a key now
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.inner.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(key = %key, "Key in flight, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Enqueue a key once the delay has elapsed
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue after the per-key exponential back-off and count the failure
    pub fn add_rate_limited(&self, key: impl Into<String>) -> Duration {
        let key = key.into();
        let failures = {
            let mut entry = self.inner.failures.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        let delay = self.inner.config.backoff(failures);
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of a key
    pub fn forget(&self, key: &str) {
        self.inner.failures.remove(key);
    }

    /// Consecutive failures recorded for a key
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.failures.get(key).map(|f| *f).unwrap_or(0)
    }

    /// Wait for the next key. `None` means the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    // Wake another waiter if more work is queued
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key as finished; replays adds that arrived while it was in flight
    pub fn done(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake all waiters
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of queued keys, excluding those in flight
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
