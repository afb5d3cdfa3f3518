//! Bounded retries for store writes
//!
//! Spec writes made by the controller (resolved references, late-initialized
//! fields, the external-name annotation, finalizers) race with users and
//! other writers. [`update_with_retry`] refetches the latest object on a
//! conflict, re-applies the mutation and tries again.

use crate::error::{ProviderError, Result};
use crate::store::{Store, StoreObject};
use kube::ResourceExt;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for conflict retries
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Retry an operation while `retryable` says so, with exponential back-off and jitter
pub async fn retry_if<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ProviderError) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && retryable(&e) => {
                // 0.5x to 1.5x of the delay
                let jitter = rand::rng().random_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered).await;
                delay = (delay * 2).min(config.max_delay);
            }
            Err(e) => {
                if attempt > 1 {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after retries"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Retry an operation on optimistic-concurrency conflicts only
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(config, operation_name, ProviderError::is_conflict, operation).await
}

/// Apply `mutate` to `obj` and write it; on conflict refetch and re-apply.
///
/// `mutate` returns false when there is nothing to write, in which case the
/// (possibly refetched) object is returned untouched. A missing object is a
/// `NotFound` error.
pub async fn update_with_retry<K, F>(
    store: &dyn Store<K>,
    config: &RetryConfig,
    obj: &K,
    mutate: F,
) -> Result<K>
where
    K: StoreObject,
    F: Fn(&mut K) -> bool,
{
    let name = obj.name_any();
    let mut current = obj.clone();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        let mut candidate = current.clone();
        if !mutate(&mut candidate) {
            return Ok(current);
        }
        match store.update(&candidate).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt < config.max_attempts => {
                debug!(name = %name, attempt, "Conflict on update, refetching");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
                current = store
                    .get(&name)
                    .await?
                    .ok_or_else(|| ProviderError::NotFound(name.clone()))?;
            }
            Err(e) => return Err(e),
        }
    }
}
