//! Retry with exponential backoff for provider calls.
//!
//! Transient failures (transport errors, 429, 5xx) are retried with
//! 100ms -> 3.2s backoff over five attempts. Client errors (other 4xx)
//! surface immediately.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(100);

/// Whether an HTTP status is worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Error classification returned by the operation under retry.
#[derive(Debug)]
pub enum CallError {
    /// Transport failure or retryable status.
    Transient(anyhow::Error),
    /// Non-retryable (4xx) failure.
    Permanent(anyhow::Error),
}

impl CallError {
    pub fn from_status(status: u16, err: anyhow::Error) -> Self {
        if is_retryable_status(status) {
            Self::Transient(err)
        } else {
            Self::Permanent(err)
        }
    }

    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Transient(e) | Self::Permanent(e) => e,
        }
    }
}

/// Run `op` with exponential backoff. The delay doubles each attempt:
/// 100ms, 200ms, 400ms, 800ms — the fifth failure is final (total backoff
/// window tops out at 3.2s with the last doubling).
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut delay = BASE_DELAY;
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(CallError::Permanent(e)) => return Err(e),
            Err(CallError::Transient(e)) => {
                if attempt < MAX_ATTEMPTS {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "{label} failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err
        .map(|e| e.context(format!("{label} failed after {MAX_ATTEMPTS} attempts")))
        .unwrap_or_else(|| anyhow::anyhow!("{label} failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallError::Transient(anyhow::anyhow!("boom")))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CallError::Permanent(anyhow::anyhow!("bad request"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_after_five_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CallError::Transient(anyhow::anyhow!("overloaded"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
