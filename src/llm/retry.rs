use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

/// Exponential backoff for transient (5xx-class) backend failures.
///
/// With the defaults a call is attempted up to 4 times, waiting 1s, 2s and
/// 4s between attempts. Non-transient errors are returned immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Factor applied to the wait after each retry
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, multiplier: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            multiplier,
        }
    }

    /// Wait before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if retry > 0 {
                        debug!("call succeeded after {} retries", retry);
                    }
                    return Ok(result);
                }
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        "attempt {} failed with transient error: {}. Retrying in {:?}",
                        retry + 1,
                        err,
                        delay
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!("giving up after {} attempts: {}", retry + 1, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> InferError {
        InferError::TransientBackend {
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, 1, 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy
            .execute(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(3, 1, 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = policy
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(3, 1, 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = policy
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(InferError::AccessRestricted("403".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_access_restricted());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
