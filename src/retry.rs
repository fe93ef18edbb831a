//! Retry logic with configurable backoff
//!
//! This module provides retry logic for transient failures. Delays grow
//! linearly by default (the policy byte ranges use) or exponentially, with
//! optional jitter, and every wait is cut short by cancellation.
//!
//! # Example
//!
//! ```no_run
//! use range_dl::retry::{IsRetryable, download_with_retry};
//! use range_dl::config::RetryConfig;
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
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! download_with_retry(&config, &cancel, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, truncated bodies, rejected ranges) should return `true`.
/// Permanent failures (local write errors, disk full, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Anything the transport reports mid-range is worth another attempt
            Error::Network(_) => true,
            Error::Download(e) => e.is_retryable(),
            // Local file failures are terminal for the transfer
            Error::WriteFailed { .. } | Error::ReadFailed { .. } | Error::Io(_) => false,
            Error::PathEscape { .. }
            | Error::InsufficientSpace { .. }
            | Error::DiskSpaceCheckFailed(_) => false,
            // Cancellation is not a failure of its own
            Error::Cancelled => false,
            Error::TaskFailed(_) => false,
            Error::FileNotFound { .. } | Error::ChecksumMismatch { .. } => false,
            Error::Resolve { .. } | Error::ManifestMismatch(_) => false,
            Error::Config { .. } | Error::Serialization(_) => false,
        }
    }
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::RangeRejected { .. }
            | DownloadError::LengthMismatch { .. }
            | DownloadError::BodyRead { .. } => true,
            // Already retried to exhaustion
            DownloadError::ChunkFailed { .. } => false,
            DownloadError::InvalidUrl { .. }
            | DownloadError::ProbeFailed { .. }
            | DownloadError::InvalidSize { .. }
            | DownloadError::UnexpectedStatus { .. } => false,
        }
    }
}

/// Execute an async operation, retrying transient failures with backoff
///
/// # Arguments
///
/// * `config` - Retry configuration (retry ceiling, delays, backoff, jitter)
/// * `cancel` - Token that aborts any pending wait between attempts
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
/// If `cancel` fires while waiting, the last error is returned immediately.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for(attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let delay = if config.jitter { add_jitter(delay) } else { delay };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(error = %e, "Retry abandoned, operation cancelled");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
