//! Best-effort retry for reports that must not block local state changes
//! (disqualification, completion). Only transient failures are retried.

use std::future::Future;
use std::time::Duration;

use crate::backend::BackendError;
use crate::config::RetryConfig;

/// Delay before attempt `attempt` (1-based), doubling up to the cap
pub fn backoff_for(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(label, attempt, "report succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff_for(&config, attempt);
                tracing::warn!(label, attempt, ?delay, "report failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(label, attempt, "report abandoned: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 250,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = fast();
        assert_eq!(backoff_for(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_for(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_for(&config, 3), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(fast(), "complete", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BackendError::Transport("down".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(fast(), "disqualify", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Transport("down".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(fast(), "complete", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Status {
                    status: 403,
                    body: "forbidden".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
