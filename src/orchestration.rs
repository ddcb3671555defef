//! Retry, throttling and per-source admission control for pipeline entry points.

use crate::error::{RagError, Result};
use governor::clock::Clock;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

/// Exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation`, retrying retryable errors until the attempt budget is spent
    pub async fn run<T, F, Fut>(&self, step: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Step {} failed (attempt {}/{}): {}; retrying in {:?}",
                        step, attempt, max_attempts, err, delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// At most `limit` admissions per `period`, with bursts of up to `limit`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub limit: u32,
    pub period: Duration,
}

impl RateLimit {
    /// GCRA quota replenishing one cell every `period / limit`
    pub fn quota(&self) -> Result<Quota> {
        let burst = NonZeroU32::new(self.limit).ok_or_else(|| {
            RagError::Configuration("rate limit must allow at least one request".to_string())
        })?;
        Quota::with_period(self.period / self.limit)
            .map(|quota| quota.allow_burst(burst))
            .ok_or_else(|| {
                RagError::Configuration(format!(
                    "rate limit period {:?} is too short for {} requests",
                    self.period, self.limit
                ))
            })
    }
}

/// How the engine admits and retries work
#[derive(Debug, Clone, PartialEq)]
pub struct IngestPolicy {
    pub retry: RetryPolicy,
    /// Concurrent ingestions allowed per source id
    pub per_source_concurrency: usize,
    /// Limit for each source id on its own
    pub rate_limit: Option<RateLimit>,
    /// Limit across all sources
    pub throttle: Option<RateLimit>,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        IngestPolicy {
            retry: RetryPolicy::default(),
            per_source_concurrency: 1,
            rate_limit: None,
            throttle: None,
        }
    }
}

type PermitMap = Arc<Mutex<HashMap<String, Arc<Semaphore>>>>;

/// Admission control: a global throttle, per-source rate limits and per-source permits
pub struct SourceGate {
    permits: usize,
    per_source: Option<DefaultKeyedRateLimiter<String>>,
    throttle: Option<DefaultDirectRateLimiter>,
    semaphores: PermitMap,
}

/// Concurrency permit for one source; the source's slot is released on drop
pub struct SourcePermit {
    permit: Option<OwnedSemaphorePermit>,
    source_id: String,
    semaphores: PermitMap,
}

impl Drop for SourcePermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut semaphores = lock(&self.semaphores);
        // only the map still refers to the semaphore: nobody holds or waits for it
        if semaphores
            .get(&self.source_id)
            .is_some_and(|s| Arc::strong_count(s) == 1)
        {
            semaphores.remove(&self.source_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SourceGate {
    pub fn new(policy: &IngestPolicy) -> Result<Self> {
        let per_source = match &policy.rate_limit {
            Some(rate) => Some(RateLimiter::keyed(rate.quota()?)),
            None => None,
        };
        let throttle = match &policy.throttle {
            Some(rate) => Some(RateLimiter::direct(rate.quota()?)),
            None => None,
        };

        Ok(SourceGate {
            permits: policy.per_source_concurrency.max(1),
            per_source,
            throttle,
            semaphores: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Reject the ingestion if `source_id` has used up its rate limit
    pub fn check_rate(&self, source_id: &str) -> Result<()> {
        let Some(limiter) = &self.per_source else {
            return Ok(());
        };
        // drop keys whose state has fully replenished
        limiter.retain_recent();

        limiter
            .check_key(&source_id.to_string())
            .map_err(|not_until| RagError::RateLimited {
                source_id: source_id.to_string(),
                retry_after: not_until.wait_time_from(limiter.clock().now()),
            })
    }

    /// Reject the ingestion if the global throttle is exhausted
    pub fn check_throttle(&self) -> Result<()> {
        let Some(limiter) = &self.throttle else {
            return Ok(());
        };
        limiter
            .check()
            .map_err(|not_until| RagError::Throttled {
                retry_after: not_until.wait_time_from(limiter.clock().now()),
            })
    }

    /// Wait for a concurrency permit for `source_id`; held until the permit is dropped
    pub async fn acquire(&self, source_id: &str) -> Result<SourcePermit> {
        let semaphore = lock(&self.semaphores)
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
            .clone();

        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| RagError::Service(format!("admission closed for {}", source_id)))?;

        Ok(SourcePermit {
            permit: Some(permit),
            source_id: source_id.to_string(),
            semaphores: self.semaphores.clone(),
        })
    }

    /// Number of sources with live admission state: (permit slots, rate-limit entries)
    pub fn tracked_sources(&self) -> (usize, usize) {
        let limited = self.per_source.as_ref().map_or(0, |l| l.len());
        (lock(&self.semaphores).len(), limited)
    }
}
