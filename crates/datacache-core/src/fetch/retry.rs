use std::future::Future;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::models::{CacheKey, CacheValue};

/// Run `attempt` until it succeeds, fails permanently, or runs out of
/// retries. Backoff doubles from `policy.base_delay_ms`.
///
/// `on_retry` is told the 1-based retry number before each backoff sleep.
pub async fn with_retry<A, Fut>(
    key: &CacheKey,
    policy: &RetryConfig,
    mut attempt: A,
    mut on_retry: impl FnMut(u32),
) -> Result<CacheValue, FetchError>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<CacheValue, FetchError>>,
{
    let mut retries = 0;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let backoff = policy.backoff(retries);
                warn!(
                    key = %key,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Fetch failed, backing off"
                );
                on_retry(retries);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use crate::models::Category;

    fn key() -> CacheKey {
        CacheKey::bare(Category::Users)
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(
            &key(),
            &RetryConfig::default(),
            || {
                *counter.lock().unwrap() += 1;
                async { Err(FetchError::from_status(404, "missing")) }
            },
            |_| {},
        )
        .await;

        assert_eq!(result, Err(FetchError::from_status(404, "missing")));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retries_with_growing_backoff() {
        let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&attempts);
        let mut retries_seen = Vec::new();

        let result = with_retry(
            &key(),
            &RetryConfig::default(),
            || {
                log.lock().unwrap().push(Instant::now());
                async { Err(FetchError::transport("connection reset")) }
            },
            |n| retries_seen.push(n),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        assert_eq!(retries_seen, vec![1, 2, 3]);

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_then_success() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(
            &key(),
            &RetryConfig::default(),
            || {
                let n = {
                    let mut c = counter.lock().unwrap();
                    *c += 1;
                    *c
                };
                async move {
                    if n < 3 {
                        Err(FetchError::from_status(503, "unavailable"))
                    } else {
                        Ok(CacheValue::from_json(json!(["ok"])))
                    }
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(result, Ok(CacheValue::from_json(json!(["ok"]))));
        assert_eq!(*calls.lock().unwrap(), 3);
    }
}
