//! Transient-only retry wrapper for idempotent remote calls.

use std::future::Future;

use rf_domain::{Backoff, Result};

/// Run `op`, retrying under `policy` while the error is transient.
///
/// Validation, auth, and permission errors bubble on the first attempt;
/// the operation must be idempotent.
pub async fn retry_transient<T, F, Fut>(policy: &Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && !policy.is_exhausted(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_domain::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> Backoff {
        Backoff {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            factor: 1.0,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Http("HTTP 503 - unavailable".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_bubble_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Validation("bad input".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Timeout("read".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
