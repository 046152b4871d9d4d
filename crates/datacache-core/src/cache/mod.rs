//! In-memory cache state.
//!
//! - `CacheStore`: key→entry map with per-category TTL checks and LRU eviction
//! - `SubscriptionBus`: per-key listeners notified on every write

pub mod store;
pub mod subscriptions;

pub use store::{CacheEntry, CacheLookup, CacheStore};
pub use subscriptions::{Subscription, SubscriptionBus};
