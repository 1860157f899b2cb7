//! Record metadata and exact-match metadata filters.
//!
//! Metadata carries a small set of well-known optional fields plus an open
//! extension map. Filters address both through the same string keys, so a
//! filter on `"source"` and a filter on a custom `"lang"` key look identical
//! to callers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vector::VectorError;

/// Metadata attached to a stored vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Source text the vector was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Originating document or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Embedding provider that produced the vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Owning user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Free-form record kind (`document`, `url`, `memory`, ...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Everything else.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Metadata {
    /// Creates metadata carrying only the source text.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Sets a field by key, returning `self` for chaining.
    ///
    /// Well-known keys land in their typed fields, everything else in the
    /// extension map. See [`Metadata::set`].
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a field by its serialized key.
    ///
    /// Well-known keys always go to their typed field so a record reads the
    /// same before and after a snapshot round trip. Scalars stored under a
    /// text field are kept in their string form; `tags` accepts a string or
    /// an array.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let slot = match key.as_str() {
            "text" => &mut self.text,
            "source" => &mut self.source,
            "provider" => &mut self.provider,
            "timestamp" => &mut self.timestamp,
            "userId" | "user_id" => &mut self.user_id,
            "type" => &mut self.kind,
            "tags" => {
                self.tags = match value {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.iter().filter_map(field_text).collect(),
                    other => field_text(&other).into_iter().collect(),
                };
                return;
            }
            _ => {
                self.extra.insert(key, value);
                return;
            }
        };
        *slot = field_text(&value);
    }

    /// Looks up a field by its serialized key.
    ///
    /// Well-known fields answer to their camelCase names (`userId`, `type`);
    /// `user_id` is accepted as an alias. Unknown keys fall through to
    /// the extension map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let string = |s: &Option<String>| s.as_ref().map(|v| Value::String(v.clone()));
        match key {
            "text" => string(&self.text),
            "source" => string(&self.source),
            "provider" => string(&self.provider),
            "timestamp" => string(&self.timestamp),
            "userId" | "user_id" => string(&self.user_id),
            "type" => string(&self.kind),
            "tags" if !self.tags.is_empty() => Some(Value::Array(
                self.tags.iter().cloned().map(Value::String).collect(),
            )),
            "tags" => None,
            other => self.extra.get(other).cloned(),
        }
    }
}

/// Exact-equality filter over metadata keys.
///
/// A record matches when every filter key is present in its metadata with a
/// value equal to the filter value. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, Value>);

impl MetadataFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key/value constraint, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Rejects filters that cannot be evaluated as exact matches.
    ///
    /// Empty keys and object values (operator syntax such as `{"$gt": 1}`)
    /// are programming errors and surface as [`VectorError::InvalidFilter`].
    pub fn validate(&self) -> Result<(), VectorError> {
        for (key, value) in &self.0 {
            if key.trim().is_empty() {
                return Err(VectorError::InvalidFilter {
                    key: key.clone(),
                    reason: "filter keys cannot be empty".to_string(),
                });
            }
            if value.is_object() {
                return Err(VectorError::InvalidFilter {
                    key: key.clone(),
                    reason: "object values are not supported, only exact matches".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns true when `metadata` satisfies every constraint.
    ///
    /// Text fields compare against the string form of scalar filter values,
    /// matching how [`Metadata::set`] stores them.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0.iter().all(|(key, expected)| {
            let Some(actual) = metadata.get(key) else {
                return false;
            };
            if actual == *expected {
                return true;
            }
            is_text_field(key)
                && field_text(expected).is_some_and(|text| actual.as_str() == Some(text.as_str()))
        })
    }

    /// Canonical string form, stable across insertion order.
    #[must_use]
    pub fn cache_key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

fn is_text_field(key: &str) -> bool {
    matches!(
        key,
        "text" | "source" | "provider" | "timestamp" | "userId" | "user_id" | "type"
    )
}

/// String form of a scalar; `None` for null, arrays and objects.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl FromIterator<(String, Value)> for MetadataFilter {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Metadata {
        Metadata {
            text: Some("rust ownership rules".to_string()),
            source: Some("https://example.com/book".to_string()),
            user_id: Some("u-1".to_string()),
            kind: Some("url".to_string()),
            tags: vec!["rust".to_string()],
            ..Metadata::default()
        }
        .with_extra("cat", "a")
        .with_extra("page", 3)
    }

    #[test]
    fn test_get_well_known_and_extra_fields() {
        let meta = sample();
        assert_eq!(meta.get("source"), Some(json!("https://example.com/book")));
        assert_eq!(meta.get("userId"), Some(json!("u-1")));
        assert_eq!(meta.get("user_id"), Some(json!("u-1")));
        assert_eq!(meta.get("type"), Some(json!("url")));
        assert_eq!(meta.get("tags"), Some(json!(["rust"])));
        assert_eq!(meta.get("cat"), Some(json!("a")));
        assert_eq!(meta.get("page"), Some(json!(3)));
        assert_eq!(meta.get("provider"), None);
        assert_eq!(meta.get("missing"), None);
    }

    #[test]
    fn test_serde_layout_flattens_extra() {
        let meta = sample();
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["cat"], "a");
        assert_eq!(value["userId"], "u-1");
        assert_eq!(value["type"], "url");
        assert!(value.get("provider").is_none());

        let back: Metadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_filter_matching() {
        let meta = sample();
        assert!(MetadataFilter::new().matches(&meta));
        assert!(MetadataFilter::new().with("cat", "a").matches(&meta));
        assert!(
            MetadataFilter::new()
                .with("cat", "a")
                .with("userId", "u-1")
                .matches(&meta)
        );
        assert!(!MetadataFilter::new().with("cat", "b").matches(&meta));
        assert!(!MetadataFilter::new().with("missing", "a").matches(&meta));
        assert!(!MetadataFilter::new().with("page", "3").matches(&meta));
    }

    #[test]
    fn test_well_known_keys_set_by_name_use_typed_fields() {
        let meta = Metadata::default()
            .with_extra("type", "doc")
            .with_extra("source", "notes.md")
            .with_extra("user_id", "u-2")
            .with_extra("tags", json!(["a", "b"]));
        assert_eq!(meta.kind.as_deref(), Some("doc"));
        assert_eq!(meta.source.as_deref(), Some("notes.md"));
        assert_eq!(meta.user_id.as_deref(), Some("u-2"));
        assert_eq!(meta.tags, vec!["a", "b"]);
        assert!(meta.extra.is_empty());

        let filter = MetadataFilter::new().with("type", "doc").with("source", "notes.md");
        assert!(filter.matches(&meta));

        let back: Metadata = serde_json::from_value(serde_json::to_value(&meta).unwrap()).unwrap();
        assert_eq!(back, meta);
        assert!(filter.matches(&back));
    }

    #[test]
    fn test_scalar_values_on_text_fields() {
        let meta = Metadata::default().with_extra("type", 5).with_extra("tags", "solo");
        assert_eq!(meta.kind.as_deref(), Some("5"));
        assert_eq!(meta.tags, vec!["solo"]);
        assert!(MetadataFilter::new().with("type", 5).matches(&meta));
        assert!(MetadataFilter::new().with("type", "5").matches(&meta));
        assert!(!MetadataFilter::new().with("type", 6).matches(&meta));
    }

    #[test]
    fn test_filter_validation() {
        assert!(MetadataFilter::new().with("cat", "a").validate().is_ok());
        assert!(matches!(
            MetadataFilter::new().with("score", json!({"$gt": 1})).validate(),
            Err(VectorError::InvalidFilter { .. })
        ));
        assert!(MetadataFilter::new().with(" ", "a").validate().is_err());
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = MetadataFilter::new().with("x", 1).with("y", "z");
        let b = MetadataFilter::new().with("y", "z").with("x", 1);
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
