//! Context-aware exponential-backoff retry, shared by the provider client
//! wrapper and the committee-roster fetch (§4.2 Phase C, §4.3, §5).
//!
//! Grounded on the retry-loop shape in `daemon/src/a2a/notify.rs`
//! (fixed `RETRY_DELAYS_MS` table + `tokio::time::sleep`), generalized to the
//! `delay_n = min(base * 2^(n-1), max)` formula from spec §5 and made
//! cancellation-aware via a caller-supplied future instead of a fixed table.

use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Typical webhook-processing retry budget (§5: "typical webhook: 3").
    pub fn webhook() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    /// Typical provider-call retry budget (§5: "provider: 5").
    pub fn provider() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let scaled = self.base_delay.saturating_mul(1u32 << shift);
        scaled.min(self.max_delay)
    }
}

/// Retries `op` under exponential backoff until it returns `Ok`, a
/// non-retryable `Err`, attempts are exhausted, or `cancelled` resolves.
///
/// `cancelled` is polled as a fresh future on every wait; pass something like
/// `ctx.cancelled()` from an async context primitive. Retried errors must be
/// classified via [`CoreError::is_retryable`].
pub async fn retry_with_backoff<F, Fut, C, CFut, T>(
    config: BackoffConfig,
    mut op: F,
    mut cancelled: C,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
    C: FnMut() -> CFut,
    CFut: Future<Output = ()>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                log::warn!(
                    "retrying after attempt {attempt}/{} failed: {err}",
                    config.max_attempts
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancelled() => {
                        return Err(CoreError::unavailable("retry cancelled"));
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry_with_backoff(
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 5,
            },
            move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(CoreError::unavailable("transient"))
                    } else {
                        Ok(42)
                    }
                }
            },
            || pending(),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), _> = retry_with_backoff(
            BackoffConfig::webhook(),
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::validation("field", "bad"))
                }
            },
            || pending(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), _> = retry_with_backoff(
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 3,
            },
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::unavailable("down"))
                }
            },
            || pending(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
