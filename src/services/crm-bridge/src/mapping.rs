//! Field mapping engine
//!
//! Turns an arbitrary inbound JSON payload into a flat object of CRM fields by
//! following each rule's dot-delimited source path. Rules whose path does not
//! resolve are skipped; mapping never fails.

use crate::models::FieldMappingRule;
use serde_json::{Map, Value};

/// Apply `rules` to `payload`, producing a flat object keyed by target field.
///
/// Later rules overwrite earlier ones that share a target field.
pub fn apply(payload: &Value, rules: &[FieldMappingRule]) -> Map<String, Value> {
    let mut mapped = Map::new();

    for rule in rules {
        if let Some(value) = resolve_path(payload, &rule.source_field) {
            mapped.insert(rule.target_field.clone(), value.clone());
        }
    }

    mapped
}

/// Resolve a dot-delimited path, descending through objects by key and arrays by index.
pub fn resolve_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |current, segment| {
        if !is_truthy(current) {
            return None;
        }
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// Loose truthiness used when picking identifiers out of payloads:
/// `null`, `false`, `0` and `""` count as missing.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// First truthy value under any of `keys`, checking `mapped` before `payload`.
pub fn first_present<'a>(
    mapped: &'a Map<String, Value>,
    payload: &'a Value,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| mapped.get(*key))
        .chain(keys.iter().filter_map(|key| payload.get(*key)))
        .find(|value| is_truthy(value))
}
