//! Retry logic with exponential backoff
//!
//! This module provides the backoff policy and a generic retry loop for transient
//! failures. Delays are deterministic: `base * multiplier^attempt`, no jitter.
//!
//! # Example
//!
//! ```no_run
//! use fetch_dispatch::retry::{BackoffPolicy, IsRetryable, retry_with_backoff};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let policy = BackoffPolicy::new(Duration::from_millis(100), 2, 4);
//! let cancel = CancellationToken::new();
//! let result = retry_with_backoff(&policy, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! # }
//! ```

use crate::error::{RetryError, TransportError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection reset) should return `true`.
/// Permanent failures should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Every transport fault is presumed transient
impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(_)
            | TransportError::Timeout(_)
            | TransportError::Protocol(_)
            | TransportError::Decode(_)
            | TransportError::Other(_) => true,
        }
    }
}

/// Exponential backoff schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: u32,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// Create a policy
    ///
    /// `max_attempts` counts the first attempt and is clamped to at least 1.
    #[must_use]
    pub fn new(base: Duration, multiplier: u32, max_attempts: u32) -> Self {
        Self {
            base,
            multiplier,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to wait after attempt number `attempt` (0-based) has failed
    ///
    /// Computed exactly in nanoseconds and saturating at [`Duration::MAX`].
    ///
    /// ```
    /// use fetch_dispatch::retry::BackoffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackoffPolicy::new(Duration::from_secs(1), 2, 4);
    /// assert_eq!(policy.wait(0), Duration::from_secs(1));
    /// assert_eq!(policy.wait(1), Duration::from_secs(2));
    /// assert_eq!(policy.wait(2), Duration::from_secs(4));
    /// ```
    #[must_use]
    pub fn wait(&self, attempt: u32) -> Duration {
        const NANOS_PER_SEC: u128 = 1_000_000_000;

        let nanos = u128::from(self.multiplier)
            .checked_pow(attempt)
            .and_then(|factor| self.base.as_nanos().checked_mul(factor));

        match nanos {
            Some(nanos) => match u64::try_from(nanos / NANOS_PER_SEC) {
                Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
                Err(_) => Duration::MAX,
            },
            None => Duration::MAX,
        }
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Same schedule with a different attempt budget
    #[must_use]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self::new(self.base, self.multiplier, max_attempts)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        crate::config::RetryConfig::default().policy()
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation receives the 0-based attempt number. No delay precedes attempt 0.
/// After attempt `a` fails with a retryable error, the loop sleeps
/// [`BackoffPolicy::wait(a)`](BackoffPolicy::wait) unless this was the last attempt.
///
/// Cancellation is observed before each attempt and while sleeping between attempts.
/// An attempt that is already running is not interrupted.
///
/// # Errors
///
/// - [`RetryError::Permanent`] for the first non-retryable error
/// - [`RetryError::Exhausted`] once every attempt failed
/// - [`RetryError::Cancelled`] if `cancel` fired first
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.wait(attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt + 1 });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: e,
                    });
                }
                tracing::error!(
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Permanent(e));
            }
        }
    }
}
