//! Retry controller: classify remote failures and back off on transient ones.
//!
//! ## Classification
//!
//! Backends fail in heterogeneous ways (HTTP status, SDK text, JSON error
//! payloads). A failure is classified by, in order:
//!
//! 1. structured status 401 / 403 → invalid credential
//! 2. case-insensitive signatures over `"[status reason] message"`:
//!    - `api key not valid`, `key invalid`, `400 bad request` → invalid credential
//!    - `429`, `quota`, `exhausted` → rate limited
//!    - `503`, `overloaded` → overloaded
//! 3. anything else → unclassified
//!
//! ## Retry Strategy
//!
//! Only rate-limited and overloaded failures are retried: up to
//! `max_retries` times after the first attempt, sleeping `base`, `2·base`,
//! `4·base`, … between attempts. Attempts are strictly sequential and each
//! wait completes before the next call starts. Every invocation owns its own
//! counters; concurrent requests back off independently.

use crate::config::AnalysisConfig;
use crate::error::FieldScanError;
use crate::pipeline::backend::BackendError;
use crate::pipeline::validate::extract_error_detail;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const INVALID_CREDENTIAL_SIGNATURES: &[&str] = &["api key not valid", "key invalid", "400 bad request"];
const RATE_LIMIT_SIGNATURES: &[&str] = &["429", "quota", "exhausted"];
const OVERLOAD_SIGNATURES: &[&str] = &["503", "overloaded"];

/// Coarse class of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    InvalidCredential,
    RateLimited,
    Overloaded,
    Unclassified,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::RateLimited | FailureClass::Overloaded)
    }
}

/// Classify free-form error text by signature.
pub fn classify_message(text: &str) -> FailureClass {
    let text = text.to_lowercase();
    let hit = |sigs: &[&str]| sigs.iter().any(|s| text.contains(s));
    if hit(INVALID_CREDENTIAL_SIGNATURES) {
        FailureClass::InvalidCredential
    } else if hit(RATE_LIMIT_SIGNATURES) {
        FailureClass::RateLimited
    } else if hit(OVERLOAD_SIGNATURES) {
        FailureClass::Overloaded
    } else {
        FailureClass::Unclassified
    }
}

/// Classify a backend failure, preferring the structured status.
pub fn classify(err: &BackendError) -> FailureClass {
    if matches!(err.status, Some(401) | Some(403)) {
        return FailureClass::InvalidCredential;
    }
    classify_message(&err.to_string())
}

/// Convert a backend failure into the user-facing error taxonomy.
pub fn classify_error(err: &BackendError, attempts: u32) -> FieldScanError {
    match classify(err) {
        FailureClass::InvalidCredential => FieldScanError::InvalidCredential {
            detail: extract_error_detail(&err.message),
        },
        FailureClass::RateLimited => FieldScanError::QuotaExceeded {
            attempts,
            detail: err.to_string(),
        },
        FailureClass::Overloaded => FieldScanError::ServerOverload {
            attempts,
            detail: err.to_string(),
        },
        FailureClass::Unclassified => FieldScanError::Unclassified {
            message: err.to_string(),
        },
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles for each later retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}

/// A successful result and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `op` under `policy`. See [`with_retry_observed`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
) -> Result<Retried<T>, FieldScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    with_retry_observed(policy, label, |_, _, _| {}, op).await
}

/// Run `op` under `policy`, calling `on_retry(retry, delay, error)` before
/// each backoff sleep.
///
/// Returns the first success, the first non-retryable classified error, or
/// the last retryable error once the budget is spent.
pub async fn with_retry_observed<T, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    mut on_retry: R,
    mut op: F,
) -> Result<Retried<T>, FieldScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
    R: FnMut(u32, Duration, &FieldScanError),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let failure = match op().await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) => classify_error(&e, attempt),
        };

        if !failure.is_retryable() {
            warn!("{}: attempt {} failed, not retrying: {}", label, attempt, failure);
            return Err(failure);
        }
        if attempt > policy.max_retries {
            warn!("{}: giving up after {} attempts: {}", label, attempt, failure);
            return Err(failure);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "{}: retry {}/{} after {}ms: {}",
            label,
            attempt,
            policy.max_retries,
            delay.as_millis(),
            failure
        );
        on_retry(attempt, delay, &failure);
        sleep(delay).await;
    }
}
