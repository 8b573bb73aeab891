use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bounded exponential backoff for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Only transport-level failures are worth another try; a payload that
/// failed to decode will fail the same way again.
pub fn is_retryable(e: &Error) -> bool {
    matches!(e, Error::Upstream(_))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(val) => return Ok(val),
            Err(e) if is_retryable(&e) && attempt + 1 < attempts => {
                let wait = policy.delay_for(attempt);
                log::warn!(
                    "{what} failed ({e}). Waiting {}ms before retry {}/{}",
                    wait.as_millis(),
                    attempt + 1,
                    attempts - 1
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_default_backoff() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast(), "fetch", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Upstream("reset".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast(), "fetch", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Upstream("down".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Upstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_decode_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast(), "fetch", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Decode("bad json".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
