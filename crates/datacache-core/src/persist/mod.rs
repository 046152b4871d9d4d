//! Durable snapshots of the cache.
//!
//! Allow-listed categories are written to a [`SnapshotStore`] a few seconds
//! after the last change, and read back once at startup. Snapshots older
//! than an hour, or that fail to parse, are thrown away.

pub mod adapter;
pub mod storage;

pub use adapter::{PersistedSnapshot, PersistenceAdapter};
pub use storage::{FileStore, MemoryStore, SnapshotStore};
