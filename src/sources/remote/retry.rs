//! Retry policy for requests to the remote evidence server.

use std::future::Future;
use std::time::Duration;

use log::warn;
use reqwest::StatusCode;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_MAX_RETRIES, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS};

/// Exponential backoff: the delay before retry `n` is
/// `min(base_delay * 2^(n-1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

/// Outcome of a request that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// 401 or 403.
    Unauthorized(String),
    /// 404.
    NotFound,
    /// Non-transient failure, not retried.
    Rejected(String),
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: String },
    /// Writing the response locally failed.
    Local(String),
    Cancelled,
}

/// Failure of a single attempt.
#[derive(Debug)]
pub enum AttemptError {
    Transient(String),
    Fatal(RequestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Unauthorized,
    NotFound,
    Rejected,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Transient
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StatusClass::Unauthorized
    } else if status == StatusCode::NOT_FOUND {
        StatusClass::NotFound
    } else {
        StatusClass::Rejected
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.execute_observed(label, cancel, attempt, |_, _| {}).await
    }

    /// Like [`RetryPolicy::execute`], reporting each scheduled retry and its
    /// delay to `on_retry` before sleeping.
    pub async fn execute_observed<T, F, Fut, O>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut attempt: F,
        mut on_retry: O,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
        O: FnMut(u32, Duration),
    {
        let mut retries = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                outcome = attempt() => outcome,
            };

            let reason = match outcome {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => reason,
            };

            if retries >= self.max_retries {
                return Err(RequestError::Exhausted {
                    attempts: retries + 1,
                    last: reason,
                });
            }

            retries += 1;
            let delay = self.delay_for(retries);
            warn!(
                "{} attempt {} failed, retrying in {:?}: {}",
                label, retries, delay, reason
            );
            on_retry(retries, delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            max_retries: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        };
        let delays: Vec<_> = (1..=6).map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_millis(1000));
        assert_eq!(delays[2], Duration::from_millis(2000));
        assert_eq!(delays[3], Duration::from_secs(4));
        assert_eq!(delays[5], Duration::from_secs(4));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        // huge retry counts saturate at the cap instead of overflowing
        assert_eq!(policy.delay_for(200), Duration::from_secs(4));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), StatusClass::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), StatusClass::Unauthorized);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Unauthorized);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::NotFound);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::Rejected);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let mut observed = Vec::new();

        let result = fast_policy(3)
            .execute_observed(
                "search",
                &CancellationToken::new(),
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(AttemptError::Transient("HTTP 503".into()))
                    } else {
                        Ok(n)
                    }
                },
                |retry, delay| observed.push((retry, delay)),
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.len(), 2);
        assert!(observed[0].1 <= observed[1].1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = fast_policy(2)
            .execute("download", &CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Transient("connection reset".into()))
            })
            .await;

        assert_eq!(
            result,
            Err(RequestError::Exhausted {
                attempts: 3,
                last: "connection reset".into()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = fast_policy(5)
            .execute("download", &CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Fatal(RequestError::Unauthorized("HTTP 401".into())))
            })
            .await;

        assert_eq!(result, Err(RequestError::Unauthorized("HTTP 401".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };

        let trigger = cancel.clone();
        let result: Result<(), _> = policy
            .execute_observed(
                "search",
                &cancel,
                || async { Err(AttemptError::Transient("HTTP 500".into())) },
                move |_, _| trigger.cancel(),
            )
            .await;

        assert_eq!(result, Err(RequestError::Cancelled));
    }
}
