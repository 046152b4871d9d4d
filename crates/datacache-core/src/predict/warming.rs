use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::usage::{Prediction, UsageHistory, UsageRecord};
use crate::config::PredictionConfig;
use crate::error::FetchError;
use crate::lock;
use crate::models::{CacheKey, CacheValue, Category};
use crate::service::DataCache;

type WarmFetcher = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<CacheValue, FetchError>> + Send + Sync>;

/// What to fetch when an action is predicted.
#[derive(Clone)]
struct Warmer {
    category: Category,
    params: Value,
    fetcher: WarmFetcher,
}

#[derive(Default)]
struct WarmQueue {
    items: VecDeque<String>,
    running: bool,
}

/// Action history, next-action prediction and the background warming queue.
pub struct UsagePredictor {
    history: Mutex<UsageHistory>,
    warmers: Mutex<HashMap<String, Warmer>>,
    queue: Mutex<WarmQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: PredictionConfig,
}

impl UsagePredictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            history: Mutex::new(UsageHistory::new(
                config.history_capacity,
                config.sequence_capacity,
            )),
            warmers: Mutex::new(HashMap::new()),
            queue: Mutex::new(WarmQueue::default()),
            worker: Mutex::new(None),
            config,
        }
    }

    pub fn tracked_actions(&self) -> usize {
        lock(&self.history).action_count()
    }

    pub fn occurrences(&self, action: &str) -> usize {
        lock(&self.history).occurrences(action)
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).items.len()
    }

    /// Queue actions not already waiting. Returns true if the caller must
    /// start a worker.
    fn enqueue(&self, actions: impl IntoIterator<Item = String>) -> bool {
        let mut queue = lock(&self.queue);
        for action in actions {
            if !queue.items.contains(&action) {
                queue.items.push_back(action);
            }
        }
        if queue.running || queue.items.is_empty() {
            return false;
        }
        queue.running = true;
        true
    }

    /// Next queued action; marks the worker stopped when the queue is empty.
    fn next_action(&self) -> Option<String> {
        let mut queue = lock(&self.queue);
        let next = queue.items.pop_front();
        if next.is_none() {
            queue.running = false;
        }
        next
    }

    fn stop(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
        let mut queue = lock(&self.queue);
        queue.items.clear();
        queue.running = false;
    }
}

impl DataCache {
    /// Tell the predictor how to warm the cache when `action` is predicted.
    pub fn register_warmer<F, Fut>(
        &self,
        action: impl Into<String>,
        category: Category,
        params: Value,
        fetcher: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
    {
        let fetcher: WarmFetcher = Arc::new(move |p: Value| fetcher(p).boxed());
        lock(&self.inner.predictor.warmers).insert(
            action.into(),
            Warmer {
                category,
                params,
                fetcher,
            },
        );
    }

    /// Record a user action and queue warming for the actions likely to
    /// follow it. Returns the predictions that were queued.
    pub fn track_user_action(&self, action: &str, metadata: Map<String, Value>) -> Vec<Prediction> {
        let predictor = &self.inner.predictor;
        let predictions = {
            let mut history = lock(&predictor.history);
            history.record(UsageRecord {
                action: action.to_string(),
                metadata,
                timestamp: self.inner.clock.now(),
            });
            history.predict_next(action, predictor.config.confidence_threshold)
        };

        if predictions.is_empty() {
            return predictions;
        }
        debug!(action = action, predicted = predictions.len(), "Queueing cache warming");

        if predictor.enqueue(predictions.iter().map(|p| p.action.clone())) {
            match Handle::try_current() {
                Ok(runtime) => {
                    let worker = runtime.spawn(self.clone().run_warming());
                    *lock(&predictor.worker) = Some(worker);
                }
                Err(_) => {
                    debug!("No async runtime, warming deferred");
                    lock(&predictor.queue).running = false;
                }
            }
        }
        predictions
    }

    /// Drain the warming queue one item at a time.
    async fn run_warming(self) {
        let predictor = &self.inner.predictor;
        let delay = predictor.config.warm_delay();

        while let Some(action) = predictor.next_action() {
            let warmer = lock(&predictor.warmers).get(&action).cloned();
            let Some(warmer) = warmer else {
                debug!(action = %action, "No warmer registered, skipping");
                continue;
            };

            let key = CacheKey::new(warmer.category, &warmer.params);
            if self.fresh_value(&key).is_some() {
                debug!(key = %key, "Already fresh, skipping warm");
                continue;
            }

            let fetcher = Arc::clone(&warmer.fetcher);
            match self
                .fetch_shared(key.clone(), warmer.params.clone(), move |p| fetcher(p), false)
                .await
            {
                Ok(_) => debug!(key = %key, action = %action, "Warmed cache entry"),
                Err(e) => warn!(key = %key, action = %action, error = %e, "Cache warming failed"),
            }
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) fn stop_warming(&self) {
        self.inner.predictor.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::config::CacheConfig;

    fn cache() -> DataCache {
        DataCache::new(CacheConfig::default()).unwrap()
    }

    fn track(cache: &DataCache, action: &str) -> Vec<Prediction> {
        cache.track_user_action(action, Map::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicted_action_is_warmed() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache.register_warmer("open_roles", Category::Roles, json!({}), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(CacheValue::from_json(json!(["admin"]))) }
        });

        track(&cache, "open_users");
        track(&cache, "open_roles");
        let predictions = track(&cache, "open_users");
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].action, "open_roles");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(Category::Roles, &json!({})).cached);
        assert_eq!(cache.inner.predictor.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_warmer_and_failures_do_not_stop_queue() {
        let cache = cache();
        let started: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&started);
        cache.register_warmer("b", Category::Teams, json!({}), move |_| {
            log.lock().unwrap().push(("b".to_string(), Instant::now()));
            async { Err(FetchError::from_status(404, "gone")) }
        });
        let log = Arc::clone(&started);
        cache.register_warmer("d", Category::Projects, json!({}), move |_| {
            log.lock().unwrap().push(("d".to_string(), Instant::now()));
            async { Ok(CacheValue::from_json(json!([]))) }
        });

        // From "a": b, c and d each follow once and occur once.
        for action in ["a", "b", "a", "c", "a", "d"] {
            track(&cache, action);
        }
        let predictions = track(&cache, "a");
        let mut predicted: Vec<&str> = predictions.iter().map(|p| p.action.as_str()).collect();
        predicted.sort();
        assert_eq!(predicted, vec!["b", "c", "d"]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = started.lock().unwrap();
        let names: Vec<&str> = started.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "d"]);
        // Serial with the inter-item delay between them.
        assert!(started[1].1 - started[0].1 >= Duration::from_millis(100));
        assert!(cache.get(Category::Projects, &json!({})).cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entries_are_not_rewarmed() {
        let cache = cache();
        cache.set(Category::Roles, &json!({}), json!(["cached"]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache.register_warmer("open_roles", Category::Roles, json!({}), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(CacheValue::from_json(json!(["fresh"]))) }
        });

        for action in ["open_users", "open_roles", "open_users"] {
            track(&cache, action);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tracking_without_runtime_keeps_history() {
        let cache = cache();
        for action in ["x", "y", "x"] {
            track(&cache, action);
        }
        assert_eq!(cache.inner.predictor.occurrences("x"), 2);
        assert_eq!(cache.inner.predictor.tracked_actions(), 2);
    }
}
