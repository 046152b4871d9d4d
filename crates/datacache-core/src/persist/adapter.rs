use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::storage::SnapshotStore;
use crate::cache::CacheEntry;
use crate::config::PersistenceConfig;
use crate::error::PersistenceError;
use crate::lock;
use crate::models::{CacheKey, CacheValue, Category};

/// On-disk layout: `{cache: {key: value}, lastFetch: {key: ms}, timestamp: ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub cache: BTreeMap<String, CacheValue>,
    pub last_fetch: BTreeMap<String, i64>,
    pub timestamp: i64,
}

impl PersistedSnapshot {
    pub fn capture<'a>(
        entries: impl Iterator<Item = (&'a CacheKey, &'a CacheEntry)>,
        allow: impl Fn(Category) -> bool,
        now: DateTime<Utc>,
    ) -> Self {
        let mut cache = BTreeMap::new();
        let mut last_fetch = BTreeMap::new();
        for (key, entry) in entries.filter(|(k, _)| allow(k.category())) {
            let name = key.to_string();
            last_fetch.insert(name.clone(), entry.stored_at.timestamp_millis());
            cache.insert(name, entry.value.clone());
        }
        Self {
            cache,
            last_fetch,
            timestamp: now.timestamp_millis(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        Duration::milliseconds(now.timestamp_millis() - self.timestamp)
    }

    /// Entries worth restoring, with their original fetch times. Keys that no
    /// longer parse, or whose category is not allowed, are skipped.
    pub fn restorable(
        &self,
        allow: impl Fn(Category) -> bool,
    ) -> Vec<(CacheKey, CacheValue, DateTime<Utc>)> {
        let fallback = DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default();
        self.cache
            .iter()
            .filter_map(|(name, value)| {
                let key: CacheKey = match name.parse() {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(key = %name, error = %e, "Skipping unparseable snapshot key");
                        return None;
                    }
                };
                if !allow(key.category()) {
                    return None;
                }
                let stored_at = self
                    .last_fetch
                    .get(name)
                    .and_then(|ms| DateTime::from_timestamp_millis(*ms))
                    .unwrap_or(fallback);
                Some((key, value.clone(), stored_at))
            })
            .collect()
    }
}

/// Debounced writer and startup loader for cache snapshots.
///
/// At most one flush is pending at a time; scheduling again aborts the
/// pending one and starts the debounce over.
pub struct PersistenceAdapter {
    store: Arc<dyn SnapshotStore>,
    config: PersistenceConfig,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn SnapshotStore>, config: PersistenceConfig) -> Self {
        Self {
            store,
            config,
            pending: Mutex::new(None),
        }
    }

    /// Read the stored snapshot for hydration.
    ///
    /// Corrupt or expired snapshots are deleted and `None` is returned.
    pub fn load(&self, now: DateTime<Utc>) -> Option<PersistedSnapshot> {
        let key = &self.config.storage_key;
        let contents = match self.store.read(key) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to read cache snapshot");
                return None;
            }
        };

        let snapshot = match serde_json::from_str::<PersistedSnapshot>(&contents) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let e = PersistenceError::CorruptSnapshot(e.to_string());
                warn!(key = %key, error = %e, "Discarding cache snapshot");
                self.discard();
                return None;
            }
        };

        let age = snapshot.age(now);
        if age > self.config.max_age() {
            info!(key = %key, age_minutes = age.num_minutes(), "Discarding expired cache snapshot");
            self.discard();
            return None;
        }

        Some(snapshot)
    }

    pub fn write(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        write_snapshot(self.store.as_ref(), &self.config.storage_key, snapshot)
    }

    /// Write `source()` once the debounce delay passes without another call.
    ///
    /// `source` runs when the timer fires, so the snapshot reflects the cache
    /// at flush time. Returns without waiting.
    pub fn schedule<S>(&self, source: S)
    where
        S: FnOnce() -> Option<PersistedSnapshot> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No async runtime, skipping scheduled cache flush");
            return;
        };

        let store = Arc::clone(&self.store);
        let key = self.config.storage_key.clone();
        let delay = self.config.debounce();

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(snapshot) = source() else {
                return;
            };
            match write_snapshot(store.as_ref(), &key, &snapshot) {
                Ok(()) => debug!(key = %key, entries = snapshot.cache.len(), "Flushed cache snapshot"),
                Err(e) => error!(key = %key, error = %e, "Failed to flush cache snapshot"),
            }
        });

        if let Some(previous) = lock(&self.pending).replace(task) {
            previous.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Drop the pending flush, if any.
    pub fn cancel(&self) {
        if let Some(task) = lock(&self.pending).take() {
            task.abort();
        }
    }

    fn discard(&self) {
        if let Err(e) = self.store.remove(&self.config.storage_key) {
            error!(key = %self.config.storage_key, error = %e, "Failed to remove cache snapshot");
        }
    }
}

impl Drop for PersistenceAdapter {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn write_snapshot(
    store: &dyn SnapshotStore,
    key: &str,
    snapshot: &PersistedSnapshot,
) -> Result<(), PersistenceError> {
    let contents = serde_json::to_string(snapshot)?;
    store.write(key, &contents)?;
    Ok(())
}
