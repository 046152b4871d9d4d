use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::models::{CacheKey, CacheValue, Category};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub stored_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Insertion order, used to break LRU ties.
    seq: u64,
}

impl CacheEntry {
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stored_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.stored_at < ttl
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    /// Present even when stale, so callers can keep showing it.
    pub value: Option<CacheValue>,
    /// True only for a value younger than its category's TTL.
    pub cached: bool,
    pub loading: bool,
}

/// Key→entry map with TTL checks and LRU eviction.
///
/// The store knows nothing about subscribers or persistence; the service
/// layer fans out after each mutation.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,
    loading: HashSet<CacheKey>,
    max_entries: usize,
    eviction_fraction: f64,
    next_seq: u64,
    evictions: u64,
}

impl CacheStore {
    pub fn new(max_entries: usize, eviction_fraction: f64) -> Self {
        Self {
            entries: HashMap::new(),
            loading: HashSet::new(),
            max_entries,
            eviction_fraction,
            next_seq: 0,
            evictions: 0,
        }
    }

    /// Read an entry. A fresh hit refreshes its LRU position; a stale or
    /// missing entry leaves LRU state alone.
    pub fn lookup(&mut self, key: &CacheKey, ttl: Duration, now: DateTime<Utc>) -> CacheLookup {
        let loading = self.loading.contains(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                let cached = entry.is_fresh(now, ttl);
                if cached {
                    entry.last_accessed = now;
                }
                CacheLookup {
                    value: Some(entry.value.clone()),
                    cached,
                    loading,
                }
            }
            None => CacheLookup {
                value: None,
                cached: false,
                loading,
            },
        }
    }

    /// Read without touching LRU state.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn is_fresh(&self, key: &CacheKey, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh(now, ttl))
    }

    /// Store a value stamped `now`, clear the loading flag, and evict if the
    /// store grew past capacity. Returns the evicted keys.
    pub fn insert(&mut self, key: CacheKey, value: CacheValue, now: DateTime<Utc>) -> Vec<CacheKey> {
        self.insert_at(key, value, now, now)
    }

    /// Store a value with an explicit fetch time (hydration).
    pub fn insert_at(
        &mut self,
        key: CacheKey,
        value: CacheValue,
        stored_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<CacheKey> {
        self.loading.remove(&key);
        let seq = match self.entries.get(&key) {
            Some(existing) => existing.seq,
            None => self.bump_seq(),
        };
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at,
                last_accessed: now,
                seq,
            },
        );
        self.evict_if_needed()
    }

    /// Put back an entry exactly as it was snapshotted, timestamps included.
    pub fn restore(&mut self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey> {
        self.loading.remove(&key);
        self.entries.insert(key, entry);
        self.evict_if_needed()
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.loading.remove(key);
        self.entries.remove(key)
    }

    /// Remove every key matching `pred`. Returns the removed keys.
    pub fn remove_where(&mut self, pred: impl Fn(&CacheKey) -> bool) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = self
            .entries
            .keys()
            .chain(self.loading.iter())
            .filter(|k| pred(k))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for key in &keys {
            self.entries.remove(key);
            self.loading.remove(key);
        }
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.loading.clear();
    }

    pub fn set_loading(&mut self, key: &CacheKey, loading: bool) {
        if loading {
            self.loading.insert(key.clone());
        } else {
            self.loading.remove(key);
        }
    }

    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.loading.contains(key)
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn keys_in(&self, category: Category) -> Vec<CacheKey> {
        self.entries
            .keys()
            .filter(|k| k.category() == category)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry)> {
        self.entries.iter()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Drop the least recently accessed ~`eviction_fraction` of entries once
    /// the store exceeds capacity, always enough to get back under it.
    fn evict_if_needed(&mut self) -> Vec<CacheKey> {
        let len = self.entries.len();
        if len <= self.max_entries {
            return Vec::new();
        }

        let by_fraction = (len as f64 * self.eviction_fraction).ceil() as usize;
        let count = by_fraction.max(len - self.max_entries).min(len);

        let mut order: Vec<(DateTime<Utc>, u64, &CacheKey)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.last_accessed, e.seq, k))
            .collect();
        order.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let victims: Vec<CacheKey> = order
            .into_iter()
            .take(count)
            .map(|(_, _, k)| k.clone())
            .collect();
        for key in &victims {
            self.entries.remove(key);
        }
        self.evictions += victims.len() as u64;
        victims
    }
}
