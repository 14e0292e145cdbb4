//! Retry logic with linear backoff
//!
//! Transient transfer failures are retried with a linearly growing delay
//! (`attempt_number * base_delay`), optionally jittered to prevent
//! thundering herd against the CDN.
//!
//! # Example
//!
//! ```no_run
//! use bili_dl::retry::{IsRetryable, retry_with_backoff};
//! use bili_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = retry_with_backoff(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, dropped reads) should
/// return `true`. Permanent failures (bad signature, missing stream, disk
/// full) and cancellation should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are retryable when they look transient
            Error::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
            }
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // A Transfer error is already the post-retry verdict
            Error::Transfer(_) => false,
            // Cancellation must never be retried
            Error::Cancelled => false,
            // Upstream/collaborator failures abort the pipeline immediately
            Error::Signing(_)
            | Error::Resolution(_)
            | Error::Transcode(_)
            | Error::Storage(_) => false,
            // Control and configuration errors are permanent
            Error::AlreadyRunning
            | Error::NothingToResume
            | Error::Config { .. }
            | Error::NotSupported(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Execute an async operation with linear backoff retry logic
///
/// Delay before retry `n` (1-based) is `n * base_delay`, capped at
/// `max_delay`. The operation is re-invoked from scratch on each attempt, so
/// any state it reads (e.g. a partial file's length) is observed fresh.
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, base delay, jitter)
/// * `operation` - Async closure returning Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// The successful result, or the last error after all attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                let delay = linear_delay(config, attempt);
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Compute the linear delay for the given 1-based attempt number, capped at `max_delay`.
fn linear_delay(config: &RetryConfig, attempt: u32) -> Duration {
    config.base_delay.saturating_mul(attempt).min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay is between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
