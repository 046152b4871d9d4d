use std::fmt::Display;
use std::future::Future;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::transforms;
use crate::cache::CacheEntry;
use crate::error::MutationError;
use crate::lock;
use crate::models::{CacheKey, CacheValue, Category};
use crate::service::DataCache;

/// Pre-mutation state of every entry an optimistic operation may touch.
type Snapshot = Vec<(CacheKey, Option<CacheEntry>)>;

impl DataCache {
    /// Apply `update` to the cached value for (category, params) and to every
    /// cached entry of each related category.
    ///
    /// Returns `Ok(false)` without doing anything if the entry is absent. A
    /// failure on the primary entry is returned; failures on related entries
    /// are logged and those entries left as they were.
    pub fn optimistic_update<F>(
        &self,
        category: Category,
        params: &Value,
        update: F,
    ) -> Result<bool, MutationError>
    where
        F: Fn(&CacheValue) -> Result<CacheValue, MutationError>,
    {
        let key = CacheKey::new(category, params);
        let Some(current) = self.peek_value(&key) else {
            debug!(key = %key, "Optimistic update skipped, nothing cached");
            return Ok(false);
        };

        let next = update(&current)?;
        self.write_through(key, next);

        for &related in self.inner.relations.related(category) {
            let keys = lock(&self.inner.store).keys_in(related);
            for key in keys {
                let Some(current) = self.peek_value(&key) else {
                    continue;
                };
                match update(&current) {
                    Ok(next) => self.write_through(key, next),
                    Err(e) => debug!(key = %key, error = %e, "Related entry left unchanged"),
                }
            }
        }
        Ok(true)
    }

    pub fn add_item(&self, category: Category, params: &Value, item: Value) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::add_item(item))
    }

    pub fn update_item(
        &self,
        category: Category,
        params: &Value,
        id: Value,
        patch: Map<String, Value>,
    ) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::update_item(id, patch))
    }

    pub fn remove_item(&self, category: Category, params: &Value, id: Value) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::remove_item(id))
    }

    pub fn batch_update(
        &self,
        category: Category,
        params: &Value,
        updates: Vec<(Value, Map<String, Value>)>,
    ) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::batch_update(updates))
    }

    pub fn grant_permission(
        &self,
        category: Category,
        params: &Value,
        id: Value,
        permission: Value,
    ) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::grant_permission(id, permission))
    }

    pub fn revoke_permission(
        &self,
        category: Category,
        params: &Value,
        id: Value,
        permission: Value,
    ) -> Result<bool, MutationError> {
        self.optimistic_update(category, params, transforms::revoke_permission(id, permission))
    }

    /// Apply `optimistic` right away, then await `api_call`.
    ///
    /// On success the entry is overwritten with the server's response. On
    /// failure every touched entry is put back exactly as it was and the API
    /// error is returned. The API call is never retried.
    pub async fn perform_optimistic_operation<F, Fut, E>(
        &self,
        category: Category,
        params: &Value,
        optimistic: F,
        api_call: Fut,
    ) -> Result<CacheValue, E>
    where
        F: Fn(&CacheValue) -> Result<CacheValue, MutationError>,
        Fut: Future<Output = Result<CacheValue, E>>,
        E: Display,
    {
        let key = CacheKey::new(category, params);
        let snapshot = self.snapshot_for_mutation(category, &key);

        if let Err(e) = self.optimistic_update(category, params, optimistic) {
            warn!(key = %key, error = %e, "Speculative update failed, waiting on server");
        }

        match api_call.await {
            Ok(response) => {
                self.write_through(key, response.clone());
                Ok(response)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Optimistic operation failed, rolling back");
                self.rollback(snapshot);
                Err(e)
            }
        }
    }

    fn snapshot_for_mutation(&self, category: Category, key: &CacheKey) -> Snapshot {
        let store = lock(&self.inner.store);
        let mut keys = vec![key.clone()];
        for &related in self.inner.relations.related(category) {
            keys.extend(store.keys_in(related));
        }
        keys.into_iter()
            .map(|k| {
                let entry = store.peek(&k).cloned();
                (k, entry)
            })
            .collect()
    }

    fn rollback(&self, snapshot: Snapshot) {
        let mut restored = Vec::new();
        {
            let mut store = lock(&self.inner.store);
            for (key, entry) in snapshot {
                if store.peek(&key) == entry.as_ref() {
                    continue;
                }
                match entry {
                    Some(entry) => {
                        let value = entry.value.clone();
                        store.restore(key.clone(), entry);
                        restored.push((key, value));
                    }
                    None => {
                        store.remove(&key);
                    }
                }
            }
        }

        for (key, value) in &restored {
            self.inner.bus.notify(key, value);
        }
        self.schedule_persist();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::error::FetchError;

    fn cache() -> DataCache {
        DataCache::new(crate::config::CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_update_on_missing_key_is_noop() {
        let cache = cache();
        let changed = cache.add_item(Category::Users, &json!({}), json!({"id": 1})).unwrap();
        assert!(!changed);
        assert!(cache.get(Category::Users, &json!({})).value.is_none());
    }

    #[test]
    fn test_add_item_to_page() {
        let cache = cache();
        let existing: Vec<Value> = (1..=5).map(|n| json!({"id": n})).collect();
        cache.set(Category::Users, &json!({}), json!({"data": existing, "total": 5}));

        cache.add_item(Category::Users, &json!({}), json!({"id": 6})).unwrap();

        let value = cache.get(Category::Users, &json!({})).value.unwrap().to_json();
        assert_eq!(value["total"], json!(6));
        assert_eq!(value["data"][0], json!({"id": 6}));
        assert_eq!(value["data"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let cache = cache();
        cache.set(Category::Teams, &json!({}), json!([{"id": 1, "name": "a"}]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = cache.subscribe(Category::Teams, &json!({}), move |v| {
            log.lock().unwrap().push(v.to_json())
        });

        let patch = json!({"name": "b"}).as_object().cloned().unwrap();
        cache.update_item(Category::Teams, &json!({}), json!(1), patch).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![json!([{"id": 1, "name": "b"}])]);
    }

    #[test]
    fn test_propagates_to_related_categories_with_fault_isolation() {
        let cache = cache();
        cache.set(Category::Users, &json!({}), json!([{"id": 1}, {"id": 2}]));
        cache.set(Category::Memberships, &json!({"org": 1}), json!([{"id": 1}, {"id": 3}]));
        cache.set(Category::Roles, &json!({}), json!({"name": "not a list"}));
        cache.set(Category::Teams, &json!({}), json!([{"id": 1}]));

        cache.remove_item(Category::Users, &json!({}), json!(1)).unwrap();

        let users = cache.get(Category::Users, &json!({})).value.unwrap().to_json();
        assert_eq!(users, json!([{"id": 2}]));
        let memberships = cache.get(Category::Memberships, &json!({"org": 1})).value.unwrap().to_json();
        assert_eq!(memberships, json!([{"id": 3}]));
        // Document in a related category is left alone.
        let roles = cache.get(Category::Roles, &json!({})).value.unwrap().to_json();
        assert_eq!(roles, json!({"name": "not a list"}));
        // Unrelated category untouched.
        let teams = cache.get(Category::Teams, &json!({})).value.unwrap().to_json();
        assert_eq!(teams, json!([{"id": 1}]));
    }

    #[test]
    fn test_primary_transform_failure_is_returned() {
        let cache = cache();
        cache.set(Category::Settings, &json!({}), json!({"theme": "dark"}));
        let err = cache
            .add_item(Category::Settings, &json!({}), json!({"id": 1}))
            .unwrap_err();
        assert_eq!(err, MutationError::NotACollection);
    }

    #[test]
    fn test_batch_update_and_permissions() {
        let cache = cache();
        cache.set(
            Category::Projects,
            &json!({}),
            json!([{"id": "a", "permissions": ["read"]}, {"id": "b"}]),
        );

        cache
            .batch_update(
                Category::Projects,
                &json!({}),
                vec![
                    (json!("a"), json!({"done": true}).as_object().cloned().unwrap()),
                    (json!("b"), json!({"done": false}).as_object().cloned().unwrap()),
                ],
            )
            .unwrap();
        cache
            .grant_permission(Category::Projects, &json!({}), json!("b"), json!("write"))
            .unwrap();
        cache
            .revoke_permission(Category::Projects, &json!({}), json!("a"), json!("read"))
            .unwrap();

        let value = cache.get(Category::Projects, &json!({})).value.unwrap().to_json();
        assert_eq!(
            value,
            json!([
                {"id": "a", "permissions": [], "done": true},
                {"id": "b", "done": false, "permissions": ["write"]},
            ])
        );
    }

    #[tokio::test]
    async fn test_operation_success_keeps_server_response() {
        let cache = cache();
        cache.set(Category::Users, &json!({}), json!([{"id": 1}]));

        let result = cache
            .perform_optimistic_operation(
                Category::Users,
                &json!({}),
                transforms::add_item(json!({"id": "temp"})),
                async { Ok::<_, FetchError>(CacheValue::from_json(json!([{"id": 2}, {"id": 1}]))) },
            )
            .await
            .unwrap();

        assert_eq!(result.to_json(), json!([{"id": 2}, {"id": 1}]));
        let stored = cache.get(Category::Users, &json!({})).value.unwrap().to_json();
        assert_eq!(stored, json!([{"id": 2}, {"id": 1}]));
    }

    #[tokio::test]
    async fn test_operation_failure_restores_exact_snapshot() {
        let cache = cache();
        cache.set(Category::Users, &json!({}), json!({"data": [{"id": 1}], "total": 1}));
        cache.set(Category::Permissions, &json!({}), json!([{"id": 9}]));
        let key = CacheKey::bare(Category::Users);
        let related_key = CacheKey::bare(Category::Permissions);
        let before = cache.peek_entry(&key).unwrap();
        let related_before = cache.peek_entry(&related_key).unwrap();

        let result = cache
            .perform_optimistic_operation(
                Category::Users,
                &json!({}),
                transforms::add_item(json!({"id": 2})),
                async { Err::<CacheValue, _>(FetchError::from_status(422, "invalid")) },
            )
            .await;

        assert_eq!(result.unwrap_err().status(), Some(422));
        assert_eq!(cache.peek_entry(&key), Some(before));
        assert_eq!(cache.peek_entry(&related_key), Some(related_before));
    }

    #[tokio::test]
    async fn test_operation_failure_on_missing_entry_leaves_it_missing() {
        let cache = cache();
        let result = cache
            .perform_optimistic_operation(
                Category::Teams,
                &json!({}),
                transforms::add_item(json!({"id": 1})),
                async { Err::<CacheValue, _>(FetchError::transport("offline")) },
            )
            .await;

        assert!(result.is_err());
        assert!(cache.get(Category::Teams, &json!({})).value.is_none());
    }
}
