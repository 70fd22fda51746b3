//! Attribute sanitation
//!
//! Graph attributes must be scalar before a snapshot is written. Source
//! rows and screening payloads can carry nested JSON, so values are
//! reduced here:
//! - strings, numbers and booleans are kept
//! - objects are flattened into dotted keys (`address.city`)
//! - arrays of scalars are joined with `"; "`
//! - nulls, empty strings and arrays holding objects are dropped
//!
//! Flattening and dropping are logged, never fatal.

use procurement_types::{AttrValue, RowAttributes};
use serde_json::Value;
use tracing::{debug, warn};

use super::model::Attributes;

/// Reduce raw row attributes to scalars
pub fn sanitize_attributes(raw: &RowAttributes, context: &str) -> Attributes {
    let mut out = Attributes::new();
    for (key, value) in raw {
        insert_flattened(&mut out, key.clone(), value, context);
    }
    out
}

/// Reduce a single JSON value under `key`, flattening into `out`
pub fn insert_flattened(out: &mut Attributes, key: String, value: &Value, context: &str) {
    match value {
        Value::Null => {
            debug!(context, key = %key, "Dropping null attribute");
        }
        Value::Bool(b) => {
            out.insert(key, AttrValue::Flag(*b));
        }
        Value::Number(n) => match n.as_f64().filter(|f| f.is_finite()) {
            Some(f) => {
                out.insert(key, AttrValue::Number(f));
            }
            None => warn!(context, key = %key, "Dropping non-finite numeric attribute"),
        },
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.insert(key, AttrValue::Text(trimmed.to_string()));
            }
        }
        Value::Array(items) => {
            if items.iter().all(is_scalar) {
                let joined = items
                    .iter()
                    .filter_map(scalar_text)
                    .collect::<Vec<_>>()
                    .join("; ");
                if !joined.is_empty() {
                    warn!(context, key = %key, items = items.len(), "Flattening list attribute");
                    out.insert(key, AttrValue::Text(joined));
                }
            } else {
                warn!(context, key = %key, "Dropping list attribute with nested values");
            }
        }
        Value::Object(map) => {
            warn!(context, key = %key, fields = map.len(), "Flattening nested attribute");
            for (sub_key, sub_value) in map {
                insert_flattened(out, format!("{}.{}", key, sub_key), sub_value, context);
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}
