//! Ready-made optimistic transforms over [`Collection`] values.
//!
//! Each function returns a closure suitable for
//! [`DataCache::optimistic_update`](crate::DataCache::optimistic_update) or
//! [`DataCache::perform_optimistic_operation`](crate::DataCache::perform_optimistic_operation).
//! Applied to a non-collection value they fail with
//! [`MutationError::NotACollection`].

use serde_json::{Map, Value};

use crate::error::MutationError;
use crate::models::{CacheValue, Collection};

/// Array field toggled by the permission helpers.
pub const PERMISSIONS_FIELD: &str = "permissions";

/// Lift an in-place collection edit into a value transform.
pub fn on_collection<G>(edit: G) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError>
where
    G: Fn(&mut Collection),
{
    move |value: &CacheValue| {
        let mut next = value.clone();
        let collection = next
            .as_collection_mut()
            .ok_or(MutationError::NotACollection)?;
        edit(collection);
        Ok(next)
    }
}

pub fn add_item(item: Value) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| c.prepend(item.clone()))
}

pub fn update_item(
    id: Value,
    patch: Map<String, Value>,
) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| {
        c.merge_by_id(&id, &patch);
    })
}

pub fn remove_item(id: Value) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| {
        c.remove_by_id(&id);
    })
}

pub fn batch_update(
    updates: Vec<(Value, Map<String, Value>)>,
) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| {
        c.merge_batch(&updates);
    })
}

pub fn grant_permission(
    id: Value,
    permission: Value,
) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| {
        c.set_membership(&id, PERMISSIONS_FIELD, &permission, true);
    })
}

pub fn revoke_permission(
    id: Value,
    permission: Value,
) -> impl Fn(&CacheValue) -> Result<CacheValue, MutationError> {
    on_collection(move |c| {
        c.set_membership(&id, PERMISSIONS_FIELD, &permission, false);
    })
}
