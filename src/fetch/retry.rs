//! Bounded retry for remote calls.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::warn;

/// Constant with Max Retry Count is a backoff policy which always returns
/// a constant duration, until it exceeds the maximum retry count.
#[derive(Debug)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// `max_retry_count` is the number of retries after the first attempt, after which
    /// `next_backoff` returns `None`.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// How often and how patiently one fetch unit is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: usize,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    fn backoff(&self) -> ConstantWithMaxRetryCount {
        ConstantWithMaxRetryCount::new(self.delay, self.max_attempts.max(1) - 1)
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. The error of the last attempt is returned.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = AtomicUsize::new(0);
    let max_attempts = policy.max_attempts.max(1);

    let task = || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let fut = op(attempt);
        async move { fut.await.map_err(backoff::Error::transient) }
    };
    let notify = |err: E, wait: Duration| {
        warn!(
            %label,
            attempt = attempts.load(Ordering::Relaxed),
            max_attempts,
            retry_in_ms = wait.as_millis() as u64,
            "Attempt failed: {}",
            err
        );
    };

    let result = backoff::future::retry_notify(policy.backoff(), task, notify).await;
    if let Err(err) = &result {
        warn!(%label, attempts = attempts.load(Ordering::Relaxed), "Giving up: {}", err);
    }
    result
}
