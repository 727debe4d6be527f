//! Deep merge for schemas and config values.
//!
//! Implements field-by-field merging where the incoming side overrides the
//! base. Arrays and scalars are opaque leaves: they are replaced entirely,
//! never concatenated. Both functions are pure and total over well-formed
//! inputs.

use crate::schema::{ObjectSchema, Schema};
use serde_json::Value;

/// Deep merge two schemas, with `incoming` taking precedence over `base`.
///
/// - Object schemas merge field-by-field: the merged field set is the union
///   of both operands', recursing where both sides declare an object.
/// - A field present on only one side is used unchanged.
/// - Anywhere else the incoming schema wins outright; an object on one side
///   and a leaf on the other are incompatible leaves and are not descended.
/// - The merged unknown-keys policy and catchall always come from the
///   incoming operand, so a later source can tighten or loosen strictness
///   for the combined shape.
pub fn merge_schemas(base: Schema, incoming: Schema) -> Schema {
    match (base, incoming) {
        (Schema::Object(base_object), Schema::Object(incoming_object)) => {
            let mut fields = base_object.fields;
            for (name, incoming_field) in incoming_object.fields {
                let merged = if let Some(base_field) = fields.remove(&name) {
                    merge_schemas(base_field, incoming_field)
                } else {
                    incoming_field
                };
                fields.insert(name, merged);
            }
            Schema::Object(ObjectSchema {
                fields,
                unknown_keys: incoming_object.unknown_keys,
                catchall: incoming_object.catchall,
            })
        }
        (_, incoming) => incoming,
    }
}

/// Deep merge two config values, with `incoming` taking precedence.
///
/// - Objects merge recursively: the key set is the union of both sides,
///   recursing where both sides hold an object.
/// - Arrays, strings, numbers, booleans, and nulls replace the base value
///   entirely; `null` on the incoming side wins like any other leaf.
pub fn merge_values(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Object(mut base_map), Value::Object(incoming_map)) => {
            for (key, incoming_value) in incoming_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    merge_values(base_value, incoming_value)
                } else {
                    incoming_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, incoming) => incoming,
    }
}
