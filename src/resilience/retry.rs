// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! # Example
//!
//! ```
//! use quiz_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on a bad durable path
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Drain: the scheduler's extra attempts after a failed drain
//! let drain = RetryConfig::drain(Duration::from_secs(60));
//! assert_eq!(drain.delay_for(0), Duration::from_secs(1));
//! assert_eq!(drain.delay_for(10), Duration::from_secs(60));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// - [`RetryConfig::startup()`] - fast-fail for opening the durable tier
/// - [`RetryConfig::drain()`] - scheduler backoff between failed drains
/// - [`RetryConfig::query()`] - quick retry for individual operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl RetryConfig {
    /// 5 attempts, failing after a few seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// 1s doubling, capped at the periodic drain interval. Unbounded: the
    /// queue's own retry bound decides when an entry is given up.
    #[must_use]
    pub fn drain(interval: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1).min(interval),
            max_delay: interval,
            factor: 2.0,
        }
    }

    /// 3 attempts with fast backoff.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.min(64) as i32);
        let secs = self.initial_delay.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds or `config.max_retries` attempts have
/// failed, sleeping [`RetryConfig::delay_for`] between attempts. The last
/// error is returned.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(val) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "Recovered after retrying");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        failures = failures.saturating_add(1);
        if config.max_retries.is_some_and(|max| failures as usize >= max) {
            return Err(err);
        }
        let wait = config.delay_for(failures - 1);
        warn!(
            operation = operation_name,
            failures,
            limit = ?config.max_retries,
            error = %err,
            retry_in = ?wait,
            "Attempt failed, backing off"
        );
        sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::TierError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryConfig {
        RetryConfig {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_first_success_needs_no_retry() {
        let calls = &AtomicU32::new(0);
        let out: Result<u32, TierError> = retry("open", &quick(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_tier_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let out = retry("open", &quick(), || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(TierError::Timeout),
                1 => Err(TierError::Unavailable("locked".into())),
                _ => Ok("pool"),
            }
        })
        .await;
        assert_eq!(out, Ok("pool"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let calls = &AtomicU32::new(0);
        let out: Result<(), TierError> = retry("open", &quick(), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(TierError::Backend(format!("attempt {n}")))
        })
        .await;
        assert_eq!(out, Err(TierError::Backend("attempt 2".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::startup().max_retries, Some(5));
        assert_eq!(RetryConfig::query().max_retries, Some(3));

        let drain = RetryConfig::drain(Duration::from_secs(60));
        assert!(drain.max_retries.is_none());
        assert_eq!(drain.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_for_doubles_then_caps() {
        let drain = RetryConfig::drain(Duration::from_secs(60));
        assert_eq!(drain.delay_for(0), Duration::from_secs(1));
        assert_eq!(drain.delay_for(1), Duration::from_secs(2));
        assert_eq!(drain.delay_for(5), Duration::from_secs(32));
        assert_eq!(drain.delay_for(6), Duration::from_secs(60));
        assert_eq!(drain.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_drain_with_short_interval() {
        let drain = RetryConfig::drain(Duration::from_millis(200));
        assert_eq!(drain.delay_for(0), Duration::from_millis(200));
    }
}
