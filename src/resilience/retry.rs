//! Retry Executor
//!
//! Runs an upstream operation with bounded exponential backoff and an
//! optional overall deadline, consulting the classifier between attempts.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

use crate::resilience::error::UpstreamError;

/// Default growth factor between consecutive backoff delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// == Retry Options ==
/// Parameters for [`with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of invocations, never less than one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Overall budget measured once from the first attempt.
    pub timeout: Option<Duration>,
}

impl RetryOptions {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            timeout: None,
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay slept after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(0.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        if millis.is_finite() {
            Duration::from_millis(millis.min(u64::MAX as f64) as u64)
        } else {
            Duration::MAX
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

// == With Retry ==
/// Invokes `operation` until it succeeds, fails fatally, exhausts
/// `max_attempts`, or the overall timeout elapses.
///
/// The deadline is fixed when the first attempt starts; an attempt still in
/// flight when it passes is dropped and its result discarded. The returned
/// error is always an [`UpstreamError`], preserving the last failure's
/// message and status.
///
/// # Example
/// ```ignore
/// let profile = with_retry(
///     || identity.fetch_profile(&user_id),
///     RetryOptions::new(3, Duration::from_millis(200)).with_timeout(Duration::from_secs(5)),
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    options: RetryOptions,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<UpstreamError>,
{
    let max_attempts = options.attempts();
    let deadline = options.timeout.map(|budget| (Instant::now() + budget, budget));
    let mut attempt: u32 = 1;

    loop {
        let outcome = match deadline {
            Some((at, budget)) => match timeout_at(at, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(attempt, budget_ms = budget.as_millis() as u64, "Retry budget exhausted");
                    return Err(UpstreamError::timeout(budget));
                }
            },
            None => operation().await,
        };

        let error: UpstreamError = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err.into(),
        };

        if !error.is_retryable() {
            debug!(attempt, class = %error.class(), error = %error, "Not retrying");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %error, "Retry attempts exhausted");
            return Err(error);
        }

        let delay = options.delay_for_attempt(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );

        match deadline {
            Some((at, budget)) => {
                let wake = Instant::now().checked_add(delay).unwrap_or(at);
                if wake >= at {
                    sleep_until(at).await;
                    warn!(attempt, budget_ms = budget.as_millis() as u64, "Retry budget exhausted during backoff");
                    return Err(UpstreamError::timeout(budget));
                }
                sleep_until(wake).await;
            }
            None => sleep(delay).await,
        }

        attempt += 1;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let options = RetryOptions::new(5, Duration::from_millis(100));
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(options.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_with_custom_multiplier() {
        let options = RetryOptions::new(5, Duration::from_millis(10)).with_backoff_multiplier(3.0);
        assert_eq!(options.delay_for_attempt(3), Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = counter();
        let seen = calls.clone();

        let result = with_retry(
            move || {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(UpstreamError::from_status(503, "unavailable"))
                    } else {
                        Ok("profile")
                    }
                }
            },
            RetryOptions::new(3, Duration::from_millis(5)),
        )
        .await;

        assert_eq!(result.unwrap(), "profile");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_preserves_last_error() {
        let calls = counter();
        let seen = calls.clone();

        let result: Result<(), _> = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::from_status(502, "bad gateway")) }
            },
            RetryOptions::new(4, Duration::from_millis(1)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.message(), "bad gateway");
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = counter();
        let seen = calls.clone();

        let result: Result<(), _> = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::from_status(400, "bad request")) }
            },
            RetryOptions::new(5, Duration::from_millis(1)),
        )
        .await;

        assert_eq!(result.unwrap_err().status(), Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_sleep() {
        let calls = counter();
        let seen = calls.clone();
        let started = std::time::Instant::now();

        let result: Result<(), _> = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err("network down") }
            },
            RetryOptions::new(1, Duration::from_secs(10)),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = counter();
        let seen = calls.clone();

        let result = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, UpstreamError>(7) }
            },
            RetryOptions::new(0, Duration::from_millis(1)),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_does_not_wait_for_slow_operation() {
        let started = std::time::Instant::now();

        let result: Result<(), _> = with_retry(
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, UpstreamError>(())
            },
            RetryOptions::new(3, Duration::from_millis(1)).with_timeout(Duration::from_millis(50)),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_is_not_reset_per_attempt() {
        let calls = counter();
        let seen = calls.clone();

        // Each attempt takes 40ms; a per-attempt budget of 100ms would allow all five.
        let result: Result<(), _> = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Err(UpstreamError::from_status(500, "boom"))
                }
            },
            RetryOptions::new(5, Duration::from_millis(1)).with_timeout(Duration::from_millis(100)),
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(calls.load(Ordering::SeqCst) < 5);
    }

    #[tokio::test]
    async fn test_backoff_crossing_deadline_stops_attempts() {
        let calls = counter();
        let seen = calls.clone();

        let result: Result<(), _> = with_retry(
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::from_status(503, "busy")) }
            },
            RetryOptions::new(3, Duration::from_secs(10)).with_timeout(Duration::from_millis(50)),
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_delays_are_applied() {
        let started = std::time::Instant::now();

        let result: Result<(), _> = with_retry(
            || async { Err(UpstreamError::new("reset by peer")) },
            RetryOptions::new(3, Duration::from_millis(20)),
        )
        .await;

        assert!(result.is_err());
        // 20ms + 40ms between the three attempts
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
