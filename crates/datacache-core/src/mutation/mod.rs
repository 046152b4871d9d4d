//! Optimistic mutation of cached collections.
//!
//! Speculative edits are applied to the cache before the server confirms
//! them, fanned out to related categories, and rolled back if the server
//! call fails.

pub mod optimistic;
pub mod relations;
pub mod transforms;

pub use relations::RelationGraph;
