use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::Value;

use super::Category;
use crate::error::ConfigError;

/// Identity of one cache entry: a category plus its canonicalised params.
///
/// Params are rendered as JSON with object keys sorted at every depth, so two
/// param objects that differ only in property order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    category: Category,
    params: String,
}

impl CacheKey {
    pub fn new(category: Category, params: &Value) -> Self {
        Self {
            category,
            params: canonical_params(params),
        }
    }

    /// Key with no params (`{}`).
    pub fn bare(category: Category) -> Self {
        Self::new(category, &Value::Null)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Canonical JSON of the params this key was built from.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.params)
    }
}

impl FromStr for CacheKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, params) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedKey(s.to_string()))?;
        let category: Category = category.parse()?;
        let params: Value =
            serde_json::from_str(params).map_err(|_| ConfigError::MalformedKey(s.to_string()))?;
        Ok(Self::new(category, &params))
    }
}

/// Render params as JSON with sorted object keys. `null` means "no params".
pub fn canonical_params(params: &Value) -> String {
    let mut out = String::new();
    match params {
        Value::Null => out.push_str("{}"),
        other => write_canonical(other, &mut out),
    }
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Strings always serialise.
                let _ = write!(out, "{}", Value::String((*key).clone()));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}
