//! Deadlines, cancellation, and retry for external capability calls.
//!
//! Two separate layers:
//!
//! - [`bounded`] is used by the core around every embedding or generation
//!   call. It enforces the caller's deadline and cancellation signal and
//!   never retries: each call is at-most-once per invocation.
//! - [`with_retry`] is used only inside provider wrappers (OpenAI, Ollama)
//!   and applies an explicit [`RetryPolicy`] to transient upstream errors.
//!
//! Dropping the in-flight future on timeout or cancellation also drops the
//! underlying HTTP request.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result};

/// Whether an HTTP status from a provider is worth retrying (429 or 5xx).
pub fn retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Bounded exponential backoff for provider wrappers.
///
/// Attempt `n` (1-based retry count) waits
/// `min(initial_backoff × 2^(n-1), max_backoff)`. With a `deadline`, no
/// retry is scheduled whose backoff would end past it; the last provider
/// error is returned instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time allowed across attempts and backoff.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            deadline: None,
        }
    }
}

/// Run an external call under a deadline and a cancellation signal.
///
/// # Errors
///
/// - [`RagError::UpstreamTimeout`] when `timeout` elapses first.
/// - [`RagError::Cancelled`] when `cancel` fires first (or already has).
/// - Otherwise whatever the call itself returns, unmodified.
pub async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RagError::Cancelled(operation)),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(RagError::UpstreamTimeout { operation, timeout }),
        },
    }
}

/// Retry `call` on retryable errors according to `policy`.
///
/// Non-retryable errors, and the last retryable error once the retry count
/// or the policy deadline is spent, are returned as-is.
pub async fn with_retry<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = tokio::time::Instant::now();
    let mut retries = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.backoff_for(retries);
                if let Some(deadline) = policy.deadline {
                    if started.elapsed() + delay >= deadline {
                        log::warn!(
                            "{} failed ({}); no time left for retry {}/{}",
                            operation,
                            e,
                            retries,
                            policy.max_retries
                        );
                        return Err(e);
                    }
                }
                log::warn!(
                    "{} failed ({}); retry {}/{} in {:?}",
                    operation,
                    e,
                    retries,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
