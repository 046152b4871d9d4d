//! Data models for cache entries.
//!
//! - `Category`: the closed set of data kinds the cache holds
//! - `CacheKey`: category plus canonicalised params
//! - `CacheValue`, `Collection`: cached payloads, with list/page collections
//!   recognised up front for the optimistic helpers

pub mod category;
pub mod key;
pub mod value;

pub use category::Category;
pub use key::{canonical_params, CacheKey};
pub use value::{CacheValue, Collection, Page, ID_FIELD};
