//! datacache-core - client-side data cache for API-backed applications.
//!
//! Holds responses keyed by category and params with per-category TTLs,
//! collapses concurrent fetches of the same key into one request, applies
//! optimistic edits with rollback, warms entries the user is likely to open
//! next, and keeps a short-lived snapshot of stable data across restarts.
//!
//! ```no_run
//! use datacache_core::{CacheConfig, CacheValue, Category, DataCache};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = DataCache::new(CacheConfig::default())?;
//! let users = cache
//!     .preload(Category::Users, &json!({"page": 1}), |_params| async {
//!         Ok(CacheValue::from_json(json!([{"id": 1}])))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod mutation;
pub mod persist;
pub mod predict;
pub mod service;

pub use cache::{CacheEntry, CacheLookup, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, PersistenceConfig, PredictionConfig, RetryConfig};
pub use error::{ConfigError, FetchError, MutationError, PersistenceError};
pub use fetch::MetricsSnapshot;
pub use models::{CacheKey, CacheValue, Category, Collection, Page};
pub use mutation::transforms;
pub use persist::{FileStore, MemoryStore, SnapshotStore};
pub use predict::Prediction;
pub use service::{DataCache, DataCacheBuilder, DetailedStats};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
