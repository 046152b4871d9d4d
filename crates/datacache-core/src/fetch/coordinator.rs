use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::metrics::{FetchMetrics, MetricsSnapshot};
use super::retry::with_retry;
use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::lock;
use crate::models::{CacheKey, CacheValue, Category};
use crate::service::DataCache;

type SharedFetch = Shared<BoxFuture<'static, Result<CacheValue, FetchError>>>;

/// Bookkeeping for in-flight fetches: one shared future per key, retry
/// counters, and metrics.
pub struct RequestCoordinator {
    pending: Mutex<HashMap<CacheKey, SharedFetch>>,
    retry_state: Mutex<HashMap<CacheKey, u32>>,
    metrics: Mutex<FetchMetrics>,
    policy: RetryConfig,
}

impl RequestCoordinator {
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            retry_state: Mutex::new(HashMap::new()),
            metrics: Mutex::new(FetchMetrics::default()),
            policy,
        }
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        lock(&self.pending).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Retry number currently in progress for `key`, if any.
    pub fn retry_attempt(&self, key: &CacheKey) -> Option<u32> {
        lock(&self.retry_state).get(key).copied()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.metrics).snapshot()
    }

    pub(crate) fn record_hit(&self) {
        lock(&self.metrics).record_hit();
    }

    pub(crate) fn reset_metrics(&self) {
        lock(&self.metrics).reset();
    }
}

impl DataCache {
    /// Return the cached value if fresh, otherwise fetch it.
    ///
    /// Concurrent calls for the same key share one fetch. Transient failures
    /// are retried with exponential backoff before the error is returned.
    pub async fn preload<F, Fut>(
        &self,
        category: Category,
        params: &Value,
        fetcher: F,
    ) -> Result<CacheValue, FetchError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let key = CacheKey::new(category, params);
        if let Some(value) = self.fresh_value(&key) {
            self.inner.coordinator.record_hit();
            return Ok(value);
        }
        self.fetch_shared(key, params.clone(), fetcher, true).await
    }

    /// Fetch even if a fresh value is cached.
    pub async fn refresh<F, Fut>(
        &self,
        category: Category,
        params: &Value,
        fetcher: F,
    ) -> Result<CacheValue, FetchError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let key = CacheKey::new(category, params);
        self.fetch_shared(key, params.clone(), fetcher, true).await
    }

    /// Refetch without flagging the key as loading. Failures are logged and
    /// yield `None`; whatever was cached stays put.
    pub async fn background_refresh<F, Fut>(
        &self,
        category: Category,
        params: &Value,
        fetcher: F,
    ) -> Option<CacheValue>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let key = CacheKey::new(category, params);
        match self.fetch_shared(key.clone(), params.clone(), fetcher, false).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Background refresh failed");
                None
            }
        }
    }

    /// Join the in-flight fetch for `key`, or start one.
    ///
    /// The fetch runs as its own task so it completes, and the cache is
    /// written, even if every caller stops waiting.
    pub(crate) async fn fetch_shared<F, Fut>(
        &self,
        key: CacheKey,
        params: Value,
        fetcher: F,
        mark_loading: bool,
    ) -> Result<CacheValue, FetchError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let coordinator = &self.inner.coordinator;
        let shared = {
            let mut pending = lock(&coordinator.pending);
            if let Some(existing) = pending.get(&key) {
                lock(&coordinator.metrics).record_dedup();
                debug!(key = %key, "Joining in-flight request");
                existing.clone()
            } else {
                lock(&coordinator.metrics).record_miss();

                // The pending lock is held until the entry is inserted, so
                // the task cannot remove it first. Store state is left to the
                // task: `pending` is never held while locking the store.
                let task = tokio::spawn(self.clone().run_fetch(
                    key.clone(),
                    params,
                    fetcher,
                    mark_loading,
                ));
                let shared = async move {
                    task.await
                        .unwrap_or_else(|e| Err(FetchError::Aborted(e.to_string())))
                }
                .boxed()
                .shared();
                pending.insert(key.clone(), shared.clone());
                shared
            }
        };
        shared.await
    }

    async fn run_fetch<F, Fut>(
        self,
        key: CacheKey,
        params: Value,
        fetcher: F,
        mark_loading: bool,
    ) -> Result<CacheValue, FetchError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let coordinator = &self.inner.coordinator;
        let mut guard = InflightGuard {
            cache: &self,
            key: &key,
            mark_loading,
            finished: false,
        };
        if mark_loading {
            lock(&self.inner.store).set_loading(&key, true);
        }
        let started = Instant::now();

        let result = with_retry(
            &key,
            &coordinator.policy,
            || fetcher(params.clone()),
            |attempt| {
                lock(&coordinator.retry_state).insert(key.clone(), attempt);
                lock(&coordinator.metrics).record_retry();
            },
        )
        .await;
        guard.finished = true;

        match &result {
            Ok(value) => {
                lock(&coordinator.metrics).record_latency(started.elapsed());
                self.write_through(key.clone(), value.clone());
            }
            Err(e) => {
                lock(&coordinator.metrics).record_error();
                if mark_loading {
                    lock(&self.inner.store).set_loading(&key, false);
                }
                warn!(key = %key, error = %e, transient = e.is_transient(), "Fetch failed");
            }
        }
        result
    }
}

/// Releases a key's in-flight bookkeeping when its fetch task ends, whether
/// it returned, panicked or was aborted.
struct InflightGuard<'a> {
    cache: &'a DataCache,
    key: &'a CacheKey,
    mark_loading: bool,
    finished: bool,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.cache.inner;
        let coordinator = &inner.coordinator;
        lock(&coordinator.retry_state).remove(self.key);
        if !self.finished {
            error!(key = %self.key, "Fetch task ended without a result");
            lock(&coordinator.metrics).record_error();
            if self.mark_loading {
                lock(&inner.store).set_loading(self.key, false);
            }
        }
        lock(&coordinator.pending).remove(self.key);
    }
}
