use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::models::Category;

/// Undirected adjacency between categories, built once and validated.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    adjacency: BTreeMap<Category, Vec<Category>>,
}

impl RelationGraph {
    pub fn new(pairs: &[(Category, Category)]) -> Result<Self, ConfigError> {
        let mut adjacency: BTreeMap<Category, Vec<Category>> = BTreeMap::new();
        for &(a, b) in pairs {
            if a == b {
                return Err(ConfigError::SelfRelation(a.to_string()));
            }
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }
        for related in adjacency.values_mut() {
            related.sort();
            related.dedup();
        }
        Ok(Self { adjacency })
    }

    pub fn related(&self, category: Category) -> &[Category] {
        self.adjacency
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_related(&self, a: Category, b: Category) -> bool {
        self.related(a).contains(&b)
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}
