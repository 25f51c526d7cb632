//! Dynamic-schema sensor documents.
//!
//! A sensor may keep part of its definition inside a nested `dynamicJson`
//! object, marked by a `dynamicSchema` key. Before the sensor is used, the
//! nested keys are lifted to the top level.

use serde_json::{Map, Value};

/// Marker key.
pub const DYNAMIC_SCHEMA_KEY: &str = "dynamicSchema";
/// Nested object whose keys get merged.
pub const DYNAMIC_JSON_KEY: &str = "dynamicJson";

/// Whether the document carries the dynamic-schema marker.
pub fn has_dynamic_schema(doc: &Map<String, Value>) -> bool {
    doc.contains_key(DYNAMIC_SCHEMA_KEY)
}

/// Merge the keys of `dynamicJson` into the top level of `doc` and drop both
/// `dynamicSchema` and `dynamicJson`.
///
/// Nested keys win over existing top-level keys. The merge is one level deep.
/// A missing or non-object `dynamicJson` only removes the marker.
pub fn flatten_dynamic_schema(mut doc: Map<String, Value>) -> Map<String, Value> {
    doc.remove(DYNAMIC_SCHEMA_KEY);
    if let Some(Value::Object(nested)) = doc.remove(DYNAMIC_JSON_KEY) {
        for (key, value) in nested {
            doc.insert(key, value);
        }
    }
    doc
}
