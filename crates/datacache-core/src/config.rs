//! Cache configuration.
//!
//! Every tunable the cache has lives here: capacity, per-category TTLs, the
//! retry policy, the relation table used for optimistic propagation, the
//! prediction heuristics and the persistence allow-list.
//!
//! Configuration is read from `~/.config/datacache/config.json` when present;
//! missing fields fall back to the defaults below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::Category;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "datacache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Maximum number of entries before LRU eviction kicks in.
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Share of entries dropped per eviction pass.
const DEFAULT_EVICTION_FRACTION: f64 = 0.1;

/// TTL for categories without an explicit entry in the TTL table.
const DEFAULT_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub eviction_fraction: f64,
    pub default_ttl_secs: u64,
    pub ttl_secs: HashMap<Category, u64>,
    pub retry: RetryConfig,
    /// Undirected pairs; updating one side propagates to the other.
    pub relations: Vec<(Category, Category)>,
    pub prediction: PredictionConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each one after.
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Records kept per action.
    pub history_capacity: usize,
    /// Actions kept in the global sequence used for next-action statistics.
    pub sequence_capacity: usize,
    /// Predictions strictly above this are warmed.
    pub confidence_threshold: f64,
    pub warm_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub storage_key: String,
    pub allow_list: Vec<Category>,
    pub debounce_ms: u64,
    /// Snapshots older than this are thrown away at startup.
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl_secs = HashMap::from([
            (Category::Users, 2 * 60),
            (Category::Roles, 10 * 60),
            (Category::Permissions, 10 * 60),
            (Category::Memberships, 5 * 60),
            (Category::Organizations, 15 * 60),
            (Category::Teams, 10 * 60),
            (Category::Settings, 30 * 60),
            (Category::Notifications, 30),
            (Category::Analytics, 5 * 60),
            (Category::AuditLogs, 60),
        ]);

        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
            default_ttl_secs: DEFAULT_TTL_SECS,
            ttl_secs,
            retry: RetryConfig::default(),
            relations: vec![
                (Category::Users, Category::Permissions),
                (Category::Users, Category::Roles),
                (Category::Users, Category::Memberships),
                (Category::Roles, Category::Permissions),
                (Category::Organizations, Category::Memberships),
                (Category::Organizations, Category::Teams),
            ],
            prediction: PredictionConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            sequence_capacity: 500,
            confidence_threshold: 0.3,
            warm_delay_ms: 100,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            storage_key: "dataCache_v1".to_string(),
            allow_list: vec![
                Category::Users,
                Category::Roles,
                Category::Permissions,
                Category::Organizations,
                Category::Settings,
                Category::Profile,
            ],
            debounce_ms: 5000,
            max_age_secs: 60 * 60,
        }
    }
}

impl CacheConfig {
    /// Load from the default location, or defaults if no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory used by the file-backed snapshot store.
    pub fn default_cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max_entries",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(ConfigError::InvalidSetting {
                name: "eviction_fraction",
                reason: format!("{} is outside (0, 1]", self.eviction_fraction),
            });
        }
        let threshold = self.prediction.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidSetting {
                name: "prediction.confidence_threshold",
                reason: format!("{} is outside (0, 1]", threshold),
            });
        }
        if self.prediction.history_capacity == 0 || self.prediction.sequence_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "prediction",
                reason: "capacities must be at least 1".to_string(),
            });
        }
        if self.persistence.storage_key.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "persistence.storage_key",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        let secs = self
            .ttl_secs
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::seconds(secs as i64)
    }

    pub fn is_persisted(&self, category: Category) -> bool {
        self.persistence.allow_list.contains(&category)
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> StdDuration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        StdDuration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl PredictionConfig {
    pub fn warm_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.warm_delay_ms)
    }
}

impl PersistenceConfig {
    pub fn debounce(&self) -> StdDuration {
        StdDuration::from_millis(self.debounce_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_secs as i64)
    }
}
