//! Reads logical fields out of third-party JSON whose shape drifts between
//! API versions.
//!
//! Each logical field has a fixed-priority list of dotted paths. The first
//! path holding a non-null value wins; the winner is recorded (for the
//! caller's metadata and the `external_field_variant_total` counter) and a
//! debug line is logged when anything other than the primary path matched.

use serde_json::Value;
use std::collections::BTreeMap;

use super::metrics;

pub struct FieldLookup<'a> {
    source: &'static str,
    root: &'a Value,
    matched: BTreeMap<String, String>,
}

impl<'a> FieldLookup<'a> {
    pub fn new(source: &'static str, root: &'a Value) -> Self {
        Self {
            source,
            root,
            matched: BTreeMap::new(),
        }
    }

    /// First non-null value among `variants`.
    pub fn value(&mut self, field: &str, variants: &[&str]) -> Option<&'a Value> {
        for (index, variant) in variants.iter().enumerate() {
            let Some(found) = lookup(self.root, variant) else {
                continue;
            };

            self.matched.insert(field.to_string(), variant.to_string());
            metrics::record_field_variant(self.source, field, variant);
            if index > 0 {
                tracing::debug!(
                    source = self.source,
                    field,
                    variant,
                    primary = variants[0],
                    "Field resolved through fallback variant"
                );
            }
            return Some(found);
        }
        None
    }

    /// String field; numbers are accepted and rendered, since platform ids
    /// flip between the two.
    pub fn string(&mut self, field: &str, variants: &[&str]) -> Option<String> {
        match self.value(field, variants)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn boolean(&mut self, field: &str, variants: &[&str]) -> Option<bool> {
        match self.value(field, variants)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Label list. Accepts a single string, an array of strings, or an array
    /// of objects carrying a `name`.
    pub fn labels(&mut self, field: &str, variants: &[&str]) -> Vec<String> {
        let Some(value) = self.value(field, variants) else {
            return Vec::new();
        };
        labels_of(value)
    }

    pub fn matched_fields(&self) -> &BTreeMap<String, String> {
        &self.matched
    }

    pub fn into_matched_fields(self) -> BTreeMap<String, String> {
        self.matched
    }
}

fn labels_of(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Walk a dotted path (`data.product.id`). Null counts as absent.
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primary_variant_wins_over_fallbacks() {
        let body = json!({"data": {"status": "active"}, "status": "inactive"});
        let mut fields = FieldLookup::new("test", &body);

        let status = fields.string("status", &["data.status", "status"]);
        assert_eq!(status.as_deref(), Some("active"));
        assert_eq!(fields.matched_fields()["status"], "data.status");
    }

    #[test]
    fn falls_back_and_records_the_variant() {
        let body = json!({"data": {"status": null}, "status": "active"});
        let mut fields = FieldLookup::new("test", &body);

        assert_eq!(
            fields.string("status", &["data.status", "status"]).as_deref(),
            Some("active")
        );
        assert_eq!(fields.matched_fields()["status"], "status");
    }

    #[test]
    fn missing_field_is_not_recorded() {
        let body = json!({"data": {}});
        let mut fields = FieldLookup::new("test", &body);
        assert!(fields.string("tier", &["data.tier", "tier"]).is_none());
        assert!(fields.matched_fields().is_empty());
    }

    #[test]
    fn labels_accept_strings_arrays_and_named_objects() {
        let body = json!({
            "a": "Premium",
            "b": ["vip", " ", "early"],
            "c": [{"name": "Gold"}, {"id": 3}],
        });
        let mut fields = FieldLookup::new("test", &body);
        assert_eq!(fields.labels("a", &["a"]), vec!["Premium"]);
        assert_eq!(fields.labels("b", &["b"]), vec!["vip", "early"]);
        assert_eq!(fields.labels("c", &["c"]), vec!["Gold"]);
    }

    #[test]
    fn numeric_ids_render_as_strings() {
        let body = json!({"user": {"id": 4242}});
        let mut fields = FieldLookup::new("test", &body);
        assert_eq!(fields.string("id", &["user.id"]).as_deref(), Some("4242"));
    }
}
