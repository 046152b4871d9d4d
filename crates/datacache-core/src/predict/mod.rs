//! Usage-driven prefetch.
//!
//! Every tracked action is appended to a bounded history. Actions that have
//! tended to follow the current one are queued, and a single background
//! worker warms their cache entries one at a time.

pub mod usage;
pub mod warming;

pub use usage::{Prediction, UsageHistory, UsageRecord};
pub use warming::UsagePredictor;
