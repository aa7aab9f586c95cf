//! Timeout and retry discipline for calls to external services.
//!
//! Vision and speech services are slow and flaky under load. Every call goes
//! through [`call_with_retry`]:
//!
//! - each attempt is bounded by `policy.timeout`; a timeout is final for the
//!   call (and therefore for its page), so one stuck request can never hold a
//!   chapter barrier open
//! - failed attempts are retried with exponential backoff
//!   (`backoff_ms * 2^attempt`), e.g. 500 ms → 1 s → 2 s

use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Time and retry budget for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Why a call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    TimedOut { secs: u64 },
    Exhausted { attempts: u32, detail: String },
}

/// Run `op` until it succeeds, times out, or exhausts its retries.
///
/// Returns the value together with the number of retries it took.
pub async fn call_with_retry<T, F, Fut>(
    label: &str,
    policy: &CallPolicy,
    mut op: F,
) -> Result<(T, u32), CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut last_err: Option<String> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy
                .backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!("{}: timed out after {:?}", label, policy.timeout);
                return Err(CallFailure::TimedOut {
                    secs: policy.timeout.as_secs(),
                });
            }
        }
    }

    Err(CallFailure::Exhausted {
        attempts: policy.max_retries + 1,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32, timeout_ms: u64) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            backoff_ms: 0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry("test", &policy(3, 1000), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ServiceError::Request("503".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok((2, 2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = call_with_retry("test", &policy(1, 1000), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Unusable("empty".into()))
        })
        .await;
        assert_eq!(
            result,
            Err(CallFailure::Exhausted {
                attempts: 2,
                detail: "unusable response: empty".into()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = call_with_retry("test", &policy(3, 20), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CallFailure::TimedOut { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
