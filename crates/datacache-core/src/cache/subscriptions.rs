use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use crate::lock;
use crate::models::{CacheKey, CacheValue};

type Callback = Arc<dyn Fn(&CacheValue) + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: HashMap<CacheKey, Vec<(u64, Callback)>>,
    next_id: u64,
}

/// Per-key listeners for value changes.
#[derive(Clone, Default)]
pub struct SubscriptionBus {
    registry: Arc<Mutex<Registry>>,
}

/// Keeps a callback registered. Dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    key: CacheKey,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(list) = registry.subscribers.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.subscribers.remove(&self.key);
            }
        }
    }
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        key: CacheKey,
        callback: impl Fn(&CacheValue) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            key,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every subscriber of `key` in registration order.
    ///
    /// Callbacks run after the registry lock is released, so they may
    /// subscribe, unsubscribe or read the cache. A panicking callback is
    /// logged and skipped. Returns how many callbacks completed.
    pub fn notify(&self, key: &CacheKey, value: &CacheValue) -> usize {
        let callbacks: Vec<Callback> = {
            let registry = lock(&self.registry);
            match registry.subscribers.get(key) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(key = %key, panic = %message, "Subscriber callback panicked");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.values().map(Vec::len).sum()
    }

    pub fn has_subscribers(&self, key: &CacheKey) -> bool {
        lock(&self.registry).subscribers.contains_key(key)
    }

    pub fn clear(&self) {
        lock(&self.registry).subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use serde_json::json;

    fn value() -> CacheValue {
        CacheValue::from_json(json!({"v": 1}))
    }

    #[test]
    fn test_notify_in_registration_order() {
        let bus = SubscriptionBus::new();
        let key = CacheKey::bare(Category::Users);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|n| {
                let seen = Arc::clone(&seen);
                bus.subscribe(key.clone(), move |_| seen.lock().unwrap().push(n))
            })
            .collect();

        assert_eq!(bus.notify(&key, &value()), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = SubscriptionBus::new();
        let key = CacheKey::bare(Category::Users);
        let hits = Arc::new(Mutex::new(0));

        let _bad = bus.subscribe(key.clone(), |_| panic!("boom"));
        let counter = Arc::clone(&hits);
        let _good = bus.subscribe(key.clone(), move |_| *counter.lock().unwrap() += 1);

        assert_eq!(bus.notify(&key, &value()), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_prunes_empty_sets() {
        let bus = SubscriptionBus::new();
        let key = CacheKey::bare(Category::Roles);

        let a = bus.subscribe(key.clone(), |_| {});
        let b = bus.subscribe(key.clone(), |_| {});
        assert_eq!(bus.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.has_subscribers(&key));

        drop(b);
        assert!(!bus.has_subscribers(&key));
        assert_eq!(bus.notify(&key, &value()), 0);
    }

    #[test]
    fn test_other_keys_are_not_notified() {
        let bus = SubscriptionBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let _sub = bus.subscribe(CacheKey::bare(Category::Users), move |_| {
            *counter.lock().unwrap() += 1
        });

        bus.notify(&CacheKey::bare(Category::Roles), &value());
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_others() {
        let bus = SubscriptionBus::new();
        let key = CacheKey::bare(Category::Teams);
        let held: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&held);
        let _first = bus.subscribe(key.clone(), move |_| {
            slot.lock().unwrap().take();
        });
        *held.lock().unwrap() = Some(bus.subscribe(key.clone(), |_| {}));

        bus.notify(&key, &value());
        assert_eq!(bus.subscriber_count(), 1);
    }
}
