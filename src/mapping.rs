//! Declarative response mapping.
//!
//! Providers return items in arbitrary shapes. A source configuration names
//! where the item array lives (`items_path`) and how each canonical field is
//! read from an item:
//!
//! ```toml
//! [sources.response_mapping_rules]
//! items_path = "data.hits"
//! [sources.response_mapping_rules.fields]
//! title = "title"
//! url = "story_url"
//! authors = "authors,join"
//! link = "objectID,prefix:https://news.ycombinator.com/item?id="
//! ```
//!
//! The string form `sourcePath[,modifier...]` is parsed once, at load time,
//! into a [`FieldRule`]. Path lookups never fail: a missing segment yields
//! `null` for that field.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::IntakeError;

/// Post-processing applied to a resolved value, in rule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// Array → delimited string. Non-string elements use their JSON text.
    Join(String),
    /// Prepend a literal to a non-null value.
    Prefix(String),
}

/// Maps one source path to one canonical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub target_field: String,
    pub source_path: String,
    pub modifiers: Vec<Modifier>,
}

impl FieldRule {
    /// Parse `sourcePath[,modifier...]`.
    pub fn parse(target_field: &str, spec: &str) -> Result<Self, IntakeError> {
        let mut parts = spec.split(',');
        let source_path = parts.next().unwrap_or_default().trim().to_string();
        if source_path.is_empty() {
            return Err(IntakeError::InvalidConfig(format!(
                "field rule '{}' has an empty source path",
                target_field
            )));
        }

        let mut modifiers = Vec::new();
        for raw in parts {
            let m = raw.trim();
            let modifier = if m == "join" {
                Modifier::Join(", ".to_string())
            } else if let Some(sep) = raw.trim_start().strip_prefix("join:") {
                Modifier::Join(sep.to_string())
            } else if let Some(lit) = raw.trim_start().strip_prefix("prefix:") {
                Modifier::Prefix(lit.to_string())
            } else {
                return Err(IntakeError::InvalidConfig(format!(
                    "field rule '{}' has unknown modifier '{}'",
                    target_field, m
                )));
            };
            modifiers.push(modifier);
        }

        Ok(Self {
            target_field: target_field.to_string(),
            source_path,
            modifiers,
        })
    }

    /// Resolve this rule against one raw item.
    pub fn apply(&self, item: &Value) -> Value {
        let mut value = resolve_path(item, &self.source_path)
            .cloned()
            .unwrap_or(Value::Null);
        for modifier in &self.modifiers {
            value = apply_modifier(value, modifier);
        }
        value
    }
}

fn apply_modifier(value: Value, modifier: &Modifier) -> Value {
    match (modifier, value) {
        (_, Value::Null) => Value::Null,
        (Modifier::Join(sep), Value::Array(items)) => Value::String(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(sep),
        ),
        (Modifier::Join(_), other) => other,
        (Modifier::Prefix(lit), Value::String(s)) => Value::String(format!("{}{}", lit, s)),
        (Modifier::Prefix(lit), other) => Value::String(format!("{}{}", lit, other)),
    }
}

/// Where the items are and how each one maps to the canonical shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMappingRules")]
pub struct MappingRules {
    /// Dotted path to the item array; `None` means the body itself.
    pub items_path: Option<String>,
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Deserialize)]
struct RawMappingRules {
    #[serde(default)]
    items_path: Option<String>,
    #[serde(default)]
    fields: std::collections::BTreeMap<String, String>,
}

impl TryFrom<RawMappingRules> for MappingRules {
    type Error = IntakeError;

    fn try_from(raw: RawMappingRules) -> Result<Self, Self::Error> {
        let fields = raw
            .fields
            .iter()
            .map(|(target, spec)| FieldRule::parse(target, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            items_path: raw.items_path.filter(|p| !p.trim().is_empty()),
            fields,
        })
    }
}

/// Walk a dotted path. Numeric segments index into arrays.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Extract the item array from a response. Never fails: a missing path or a
/// non-array target yields no items.
pub fn raw_items(body: &Value, items_path: Option<&str>) -> Vec<Value> {
    let target = match items_path {
        Some(path) if !path.is_empty() => resolve_path(body, path),
        _ => Some(body),
    };
    match target {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Map one raw item. Every rule's target key is present in the output.
pub fn map_item(item: &Value, rules: &[FieldRule]) -> Map<String, Value> {
    rules
        .iter()
        .map(|rule| (rule.target_field.clone(), rule.apply(item)))
        .collect()
}

/// Extract and map all items of a response.
pub fn map_items(body: &Value, rules: &MappingRules) -> Vec<Map<String, Value>> {
    raw_items(body, rules.items_path.as_deref())
        .iter()
        .map(|item| map_item(item, &rules.fields))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_objects_and_array_indexes() {
        let v = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(resolve_path(&v, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(resolve_path(&v, "a.x.c"), None);
        assert_eq!(resolve_path(&v, "a.b.9"), None);
        assert_eq!(resolve_path(&v, "a.b.c"), None);
        assert_eq!(resolve_path(&v, ""), Some(&v));
    }

    #[test]
    fn raw_items_tolerates_shape_drift() {
        let body = json!({"data": {"hits": [{"t": 1}, {"t": 2}]}});
        assert_eq!(raw_items(&body, Some("data.hits")).len(), 2);
        assert!(raw_items(&body, Some("data.missing")).is_empty());
        assert!(raw_items(&body, Some("data")).is_empty());
        assert_eq!(raw_items(&json!([1, 2, 3]), None).len(), 3);
        assert!(raw_items(&json!("text"), None).is_empty());
    }

    #[test]
    fn parses_rule_modifiers() {
        // Commas separate modifiers, so a literal cannot contain one.
        let err = FieldRule::parse("link", "id,prefix:https://x.test/?a=1,b").unwrap_err();
        assert!(matches!(err, IntakeError::InvalidConfig(_)));

        let rule = FieldRule::parse("authors", "authors.names, join:; ").unwrap();
        assert_eq!(rule.source_path, "authors.names");
        assert_eq!(rule.modifiers, vec![Modifier::Join("; ".into())]);

        let rule = FieldRule::parse("link", "objectID,prefix:item?id=").unwrap();
        assert_eq!(rule.modifiers, vec![Modifier::Prefix("item?id=".into())]);

        assert!(FieldRule::parse("x", "path,upper").is_err());
        assert!(FieldRule::parse("x", " ").is_err());
    }

    #[test]
    fn missing_fields_map_to_null() {
        let rules: MappingRules = serde_json::from_value(json!({
            "items_path": "hits",
            "fields": {
                "title": "title",
                "authors": "people,join",
                "url": "objectID,prefix:https://news.example/item?id=",
                "summary": "story_text"
            }
        }))
        .unwrap();

        let body = json!({"hits": [
            {"title": "Rust 2.0", "people": ["ana", "bo"], "objectID": 42},
            {"people": "solo"}
        ]});
        let items = map_items(&body, &rules);
        assert_eq!(items.len(), 2);

        assert_eq!(items[0]["title"], json!("Rust 2.0"));
        assert_eq!(items[0]["authors"], json!("ana, bo"));
        assert_eq!(items[0]["url"], json!("https://news.example/item?id=42"));
        assert_eq!(items[0]["summary"], Value::Null);

        assert_eq!(items[1]["title"], Value::Null);
        assert_eq!(items[1]["authors"], json!("solo"));
        assert_eq!(items[1]["url"], Value::Null);
        assert_eq!(items[1].len(), 4);
    }

    #[test]
    fn empty_items_path_means_body() {
        let rules: MappingRules =
            serde_json::from_value(json!({"items_path": "", "fields": {"t": "t"}})).unwrap();
        assert_eq!(rules.items_path, None);
    }
}
