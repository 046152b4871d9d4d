//! The `DataCache` service.
//!
//! Owns the store, subscriptions, request coordinator, relation graph,
//! usage predictor and persistence adapter, and wires them together: every
//! write goes through [`DataCache::set`] (or its internal twin), which
//! notifies subscribers and schedules a snapshot flush.
//!
//! Instances are independent. Build one per application (or per test) with
//! [`DataCache::new`] or [`DataCache::builder`], share it by cloning, and
//! call [`DataCache::dispose`] on shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheLookup, CacheStore, Subscription, SubscriptionBus};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{ConfigError, PersistenceError};
use crate::fetch::RequestCoordinator;
use crate::lock;
use crate::models::{CacheKey, CacheValue, Category};
use crate::mutation::RelationGraph;
use crate::persist::{PersistedSnapshot, PersistenceAdapter, SnapshotStore};
use crate::predict::UsagePredictor;

pub(crate) struct Inner {
    pub(crate) config: CacheConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) store: Mutex<CacheStore>,
    pub(crate) bus: SubscriptionBus,
    pub(crate) coordinator: RequestCoordinator,
    pub(crate) relations: RelationGraph,
    pub(crate) predictor: UsagePredictor,
    pub(crate) persistence: Option<PersistenceAdapter>,
    disposed: AtomicBool,
}

/// Client-side data cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataCache {
    pub(crate) inner: Arc<Inner>,
}

/// Everything [`DataCache::detailed_stats`] reports.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedStats {
    pub hit_rate: f64,
    pub avg_latency: Duration,
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
    pub errors: u64,
    pub retries: u64,
    pub evictions: u64,
    pub total_entries: usize,
    pub entries_by_category: BTreeMap<Category, usize>,
    /// Age of the most recently fetched entry per category ("5m ago").
    pub freshest_by_category: BTreeMap<Category, String>,
    /// Serialised size of all cached values, in bytes.
    pub memory_estimate: usize,
    pub loading: usize,
    pub pending_requests: usize,
    pub subscribers: usize,
    pub tracked_actions: usize,
    pub queued_warms: usize,
    pub persistence_pending: bool,
}

#[derive(Default)]
pub struct DataCacheBuilder {
    config: Option<CacheConfig>,
    clock: Option<Arc<dyn Clock>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl DataCacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable persistence. The stored snapshot is loaded during `build`.
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn build(self) -> Result<DataCache, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let relations = RelationGraph::new(&config.relations)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let persistence = self
            .snapshot_store
            .map(|store| PersistenceAdapter::new(store, config.persistence.clone()));

        let cache = DataCache {
            inner: Arc::new(Inner {
                store: Mutex::new(CacheStore::new(config.max_entries, config.eviction_fraction)),
                bus: SubscriptionBus::new(),
                coordinator: RequestCoordinator::new(config.retry.clone()),
                relations,
                predictor: UsagePredictor::new(config.prediction.clone()),
                persistence,
                clock,
                config,
                disposed: AtomicBool::new(false),
            }),
        };
        cache.hydrate();
        Ok(cache)
    }
}

impl DataCache {
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> DataCacheBuilder {
        DataCacheBuilder::default()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn ttl_for(&self, category: Category) -> ChronoDuration {
        self.inner.config.ttl_for(category)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value for (category, params), with freshness and loading
    /// state. A fresh hit counts as recently used for eviction.
    pub fn get(&self, category: Category, params: &Value) -> CacheLookup {
        let key = CacheKey::new(category, params);
        let ttl = self.ttl_for(category);
        let now = self.inner.clock.now();
        lock(&self.inner.store).lookup(&key, ttl, now)
    }

    /// Copy of the stored entry, timestamps included. Does not touch LRU.
    pub fn peek_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        lock(&self.inner.store).peek(key).cloned()
    }

    pub(crate) fn peek_value(&self, key: &CacheKey) -> Option<CacheValue> {
        lock(&self.inner.store).peek(key).map(|e| e.value.clone())
    }

    /// The value for `key` if it is within its TTL, refreshing its LRU slot.
    pub(crate) fn fresh_value(&self, key: &CacheKey) -> Option<CacheValue> {
        let ttl = self.ttl_for(key.category());
        let now = self.inner.clock.now();
        let lookup = lock(&self.inner.store).lookup(key, ttl, now);
        if lookup.cached {
            lookup.value
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.store).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.store).is_empty()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn set(&self, category: Category, params: &Value, value: impl Into<CacheValue>) {
        self.write_through(CacheKey::new(category, params), value.into());
    }

    /// Store, evict, notify, schedule a flush. In that order.
    pub(crate) fn write_through(&self, key: CacheKey, value: CacheValue) {
        let now = self.inner.clock.now();
        let evicted = lock(&self.inner.store).insert(key.clone(), value.clone(), now);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted least recently used entries");
        }
        self.inner.bus.notify(&key, &value);
        self.schedule_persist();
    }

    pub fn subscribe(
        &self,
        category: Category,
        params: &Value,
        callback: impl Fn(&CacheValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.subscribe(CacheKey::new(category, params), callback)
    }

    /// Forget exactly one entry.
    pub fn invalidate(&self, category: Category, params: &Value) {
        let key = CacheKey::new(category, params);
        if lock(&self.inner.store).remove(&key).is_some() {
            debug!(key = %key, "Invalidated cache entry");
        }
        self.schedule_persist();
    }

    /// Forget every entry of a category.
    pub fn invalidate_type(&self, category: Category) {
        let removed = lock(&self.inner.store).remove_where(|k| k.category() == category);
        debug!(category = %category, count = removed.len(), "Invalidated category");
        self.schedule_persist();
    }

    /// Forget every entry whose rendered key (`category:{params}`) starts
    /// with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let removed = lock(&self.inner.store).remove_where(|k| k.starts_with(prefix));
        debug!(prefix = prefix, count = removed.len(), "Invalidated by prefix");
        self.schedule_persist();
    }

    pub fn clear_all(&self) {
        lock(&self.inner.store).clear();
        info!("Cleared all cache entries");
        self.schedule_persist();
    }

    /// Zero the hit/miss/latency counters.
    pub fn reset_stats(&self) {
        self.inner.coordinator.reset_metrics();
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn snapshot(&self) -> PersistedSnapshot {
        let config = &self.inner.config;
        let now = self.inner.clock.now();
        let store = lock(&self.inner.store);
        PersistedSnapshot::capture(store.iter(), |c| config.is_persisted(c), now)
    }

    pub(crate) fn schedule_persist(&self) {
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        if self.inner.disposed.load(Ordering::Acquire) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        persistence.schedule(move || {
            weak.upgrade()
                .map(|inner| DataCache { inner }.snapshot())
        });
    }

    /// Write the snapshot now, dropping any pending debounced flush.
    pub fn flush_now(&self) -> Result<(), PersistenceError> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(());
        };
        persistence.cancel();
        persistence.write(&self.snapshot())
    }

    /// Load the stored snapshot into the store, keeping original fetch times.
    fn hydrate(&self) {
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        let now = self.inner.clock.now();
        let Some(snapshot) = persistence.load(now) else {
            return;
        };

        let config = &self.inner.config;
        let entries = snapshot.restorable(|c| config.is_persisted(c));
        let count = entries.len();
        let mut store = lock(&self.inner.store);
        for (key, value, stored_at) in entries {
            store.insert_at(key, value, stored_at, now);
        }
        info!(entries = count, "Restored cache snapshot");
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop background work, write a final snapshot and drop subscribers.
    /// The cache stays readable afterwards but no longer persists.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_warming();
        if let Err(e) = self.flush_now() {
            tracing::error!(error = %e, "Failed to write final cache snapshot");
        }
        self.inner.bus.clear();
        info!("Data cache disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Store-derived numbers are gathered under the store lock alone; the
    /// coordinator, bus and predictor are queried after it is released.
    pub fn detailed_stats(&self) -> DetailedStats {
        let now = self.inner.clock.now();

        let mut entries_by_category = BTreeMap::new();
        let mut freshest_by_category = BTreeMap::new();
        let mut memory_estimate = 0;
        let (evictions, total_entries, loading) = {
            let store = lock(&self.inner.store);
            let mut freshest: BTreeMap<Category, &CacheEntry> = BTreeMap::new();
            for (key, entry) in store.iter() {
                *entries_by_category.entry(key.category()).or_insert(0) += 1;
                memory_estimate += key.to_string().len() + entry.value.approx_size();
                freshest
                    .entry(key.category())
                    .and_modify(|best| {
                        if entry.stored_at > best.stored_at {
                            *best = entry;
                        }
                    })
                    .or_insert(entry);
            }
            for (category, entry) in freshest {
                freshest_by_category.insert(category, entry.age_display(now));
            }
            (store.evictions(), store.len(), store.loading_count())
        };

        let metrics = self.inner.coordinator.metrics();
        DetailedStats {
            hit_rate: metrics.hit_rate,
            avg_latency: metrics.avg_latency,
            hits: metrics.hits,
            misses: metrics.misses,
            deduplicated: metrics.deduplicated,
            errors: metrics.errors,
            retries: metrics.retries,
            evictions,
            total_entries,
            entries_by_category,
            freshest_by_category,
            memory_estimate,
            loading,
            pending_requests: self.inner.coordinator.pending_count(),
            subscribers: self.inner.bus.subscriber_count(),
            tracked_actions: self.inner.predictor.tracked_actions(),
            queued_warms: self.inner.predictor.queued(),
            persistence_pending: self
                .inner
                .persistence
                .as_ref()
                .is_some_and(PersistenceAdapter::has_pending),
        }
    }
}
