use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field that identifies an item inside a collection.
pub const ID_FIELD: &str = "id";

/// A cached value.
///
/// Collections are recognised once, when the value enters the cache, so the
/// optimistic helpers never have to sniff payload shapes. Deserialising
/// goes through [`CacheValue::from_json`], so values read back from a
/// snapshot are classified exactly as when they were first cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "Value")]
pub enum CacheValue {
    Collection(Collection),
    Document(Value),
}

/// A list of items, either bare or wrapped in a page envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Collection {
    /// `[item, ...]`
    List(Vec<Value>),
    /// `{"data": [item, ...], "total": n, ...}`
    Page(Page),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Any other envelope fields (cursors, page numbers), carried untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CacheValue {
    /// Classify a raw JSON payload.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => CacheValue::Collection(Collection::List(items)),
            Value::Object(mut map) if matches!(map.get("data"), Some(Value::Array(_))) => {
                let total = match map.get("total") {
                    None => None,
                    Some(t) => match t.as_u64() {
                        Some(n) => Some(n),
                        None => return CacheValue::Document(Value::Object(map)),
                    },
                };
                let data = match map.remove("data") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                map.remove("total");
                CacheValue::Collection(Collection::Page(Page {
                    data,
                    total,
                    extra: map,
                }))
            }
            other => CacheValue::Document(other),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            CacheValue::Collection(c) => Some(c),
            CacheValue::Document(_) => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            CacheValue::Collection(c) => Some(c),
            CacheValue::Document(_) => None,
        }
    }

    /// Rough in-memory footprint, measured as serialised JSON bytes.
    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::from_json(value)
    }
}

impl From<Vec<Value>> for CacheValue {
    fn from(items: Vec<Value>) -> Self {
        CacheValue::Collection(Collection::List(items))
    }
}

impl From<Collection> for CacheValue {
    fn from(collection: Collection) -> Self {
        CacheValue::Collection(collection)
    }
}

impl Collection {
    pub fn page(data: Vec<Value>, total: u64) -> Self {
        Collection::Page(Page {
            data,
            total: Some(total),
            extra: Map::new(),
        })
    }

    pub fn items(&self) -> &[Value] {
        match self {
            Collection::List(items) => items,
            Collection::Page(page) => &page.data,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<Value> {
        match self {
            Collection::List(items) => items,
            Collection::Page(page) => &mut page.data,
        }
    }

    pub fn total(&self) -> Option<u64> {
        match self {
            Collection::List(_) => None,
            Collection::Page(page) => page.total,
        }
    }

    fn adjust_total(&mut self, delta: i64) {
        if let Collection::Page(Page { total: Some(total), .. }) = self {
            *total = if delta >= 0 {
                total.saturating_add(delta as u64)
            } else {
                total.saturating_sub(delta.unsigned_abs())
            };
        }
    }

    /// Insert at the front and bump `total`.
    pub fn prepend(&mut self, item: Value) {
        self.items_mut().insert(0, item);
        self.adjust_total(1);
    }

    /// Shallow-merge `patch` into every item whose id equals `id`.
    /// Returns the number of items changed.
    pub fn merge_by_id(&mut self, id: &Value, patch: &Map<String, Value>) -> usize {
        let mut changed = 0;
        for item in self.items_mut().iter_mut() {
            if item_id(item) == Some(id) {
                if let Value::Object(fields) = item {
                    for (k, v) in patch {
                        fields.insert(k.clone(), v.clone());
                    }
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Drop every item whose id equals `id`, decrementing `total` per removal.
    pub fn remove_by_id(&mut self, id: &Value) -> usize {
        let items = self.items_mut();
        let before = items.len();
        items.retain(|item| item_id(item) != Some(id));
        let removed = before - items.len();
        self.adjust_total(-(removed as i64));
        removed
    }

    /// Apply several `(id, patch)` merges in order.
    pub fn merge_batch(&mut self, updates: &[(Value, Map<String, Value>)]) -> usize {
        updates
            .iter()
            .map(|(id, patch)| self.merge_by_id(id, patch))
            .sum()
    }

    /// Add or remove `member` from the array field `field` of the item with
    /// the given id. Returns true if any item changed.
    pub fn set_membership(&mut self, id: &Value, field: &str, member: &Value, present: bool) -> bool {
        let mut changed = false;
        for item in self.items_mut().iter_mut() {
            if item_id(item) != Some(id) {
                continue;
            }
            let Value::Object(fields) = item else { continue };
            let list = fields
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(members) = list else { continue };

            let has = members.contains(member);
            if present && !has {
                members.push(member.clone());
                changed = true;
            } else if !present && has {
                members.retain(|m| m != member);
                changed = true;
            }
        }
        changed
    }
}

fn item_id(item: &Value) -> Option<&Value> {
    item.get(ID_FIELD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("patch must be an object"),
        }
    }

    #[test]
    fn test_from_json_classifies_shapes() {
        assert!(matches!(
            CacheValue::from_json(json!([1, 2])),
            CacheValue::Collection(Collection::List(_))
        ));
        assert!(matches!(
            CacheValue::from_json(json!({"data": [], "total": 0})),
            CacheValue::Collection(Collection::Page(_))
        ));
        assert!(matches!(
            CacheValue::from_json(json!({"theme": "dark"})),
            CacheValue::Document(_)
        ));
        // A non-numeric total is not a page envelope.
        assert!(matches!(
            CacheValue::from_json(json!({"data": [], "total": "many"})),
            CacheValue::Document(_)
        ));
    }

    #[test]
    fn test_page_serialises_with_extra_fields() {
        let raw = json!({"data": [{"id": 1}], "total": 1, "cursor": "abc"});
        let value = CacheValue::from_json(raw.clone());
        assert_eq!(value.to_json(), raw);

        let parsed: CacheValue = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_prepend_increments_total() {
        let mut page = Collection::page(vec![json!({"id": 1})], 5);
        page.prepend(json!({"id": 9}));
        assert_eq!(page.items()[0], json!({"id": 9}));
        assert_eq!(page.total(), Some(6));

        let mut list = Collection::List(vec![]);
        list.prepend(json!({"id": 1}));
        assert_eq!(list.total(), None);
        assert_eq!(list.items().len(), 1);
    }

    #[test]
    fn test_merge_and_remove_by_id() {
        let mut page = Collection::page(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})], 2);

        assert_eq!(page.merge_by_id(&json!(2), &patch(json!({"name": "B", "active": true}))), 1);
        assert_eq!(page.items()[1], json!({"id": 2, "name": "B", "active": true}));

        assert_eq!(page.merge_by_id(&json!(42), &patch(json!({"name": "x"}))), 0);

        assert_eq!(page.remove_by_id(&json!(1)), 1);
        assert_eq!(page.items().len(), 1);
        assert_eq!(page.total(), Some(1));

        assert_eq!(page.remove_by_id(&json!(1)), 0);
        assert_eq!(page.total(), Some(1));
    }

    #[test]
    fn test_deserialize_matches_from_json() {
        for raw in [
            json!({"data": [{"id": 1}], "total": null}),
            json!({"data": [{"id": 1}], "total": -3}),
            json!({"data": [{"id": 1}], "total": 1, "cursor": "abc"}),
            json!({"data": [{"id": 1}]}),
            json!([{"id": 1}]),
            json!({"theme": "dark"}),
        ] {
            let parsed: CacheValue = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(parsed, CacheValue::from_json(raw.clone()));
            assert_eq!(parsed.to_json(), raw);
        }
    }

    #[test]
    fn test_total_never_underflows() {
        let mut page = Collection::page(vec![json!({"id": 1}), json!({"id": 1})], 1);
        page.remove_by_id(&json!(1));
        assert_eq!(page.total(), Some(0));
    }

    #[test]
    fn test_merge_batch() {
        let mut list = Collection::List(vec![json!({"id": "a"}), json!({"id": "b"})]);
        let changed = list.merge_batch(&[
            (json!("a"), patch(json!({"n": 1}))),
            (json!("b"), patch(json!({"n": 2}))),
            (json!("c"), patch(json!({"n": 3}))),
        ]);
        assert_eq!(changed, 2);
        assert_eq!(list.items(), &[json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})]);
    }

    #[test]
    fn test_set_membership_toggles() {
        let mut list = Collection::List(vec![json!({"id": 1, "permissions": ["read"]})]);

        assert!(list.set_membership(&json!(1), "permissions", &json!("write"), true));
        assert!(!list.set_membership(&json!(1), "permissions", &json!("write"), true));
        assert_eq!(list.items()[0]["permissions"], json!(["read", "write"]));

        assert!(list.set_membership(&json!(1), "permissions", &json!("read"), false));
        assert_eq!(list.items()[0]["permissions"], json!(["write"]));

        let mut bare = Collection::List(vec![json!({"id": 2})]);
        assert!(bare.set_membership(&json!(2), "permissions", &json!("admin"), true));
        assert_eq!(bare.items()[0]["permissions"], json!(["admin"]));
    }
}
