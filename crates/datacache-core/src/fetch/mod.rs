//! Request coordination.
//!
//! Turns (category, params, fetcher) into at most one in-flight request per
//! key. Transient failures (no response, 5xx) are retried with exponential
//! backoff; anything else fails straight away. Hit/miss counts and a rolling
//! latency window are kept for [`crate::DataCache::detailed_stats`].

pub mod coordinator;
pub mod metrics;
pub mod retry;

pub use coordinator::RequestCoordinator;
pub use metrics::{FetchMetrics, MetricsSnapshot};
