//! Typed schema descriptions and validation.
//!
//! A [`Schema`] describes the valid shape of a config value. Object schemas
//! carry an unknown-keys policy (strict / strip / passthrough) and an
//! optional catchall schema applied to keys not explicitly listed, mirroring
//! the declarative form used in definition files:
//!
//! ```yaml
//! type: object
//! unknown_keys: strict
//! fields:
//!   name: { type: string }
//!   scripts:
//!     type: object
//!     catchall: { type: string }
//! ```
//!
//! Validation collects every violation in one pass so the operator sees all
//! problems at once, and produces a coerced copy of the value (the `strip`
//! policy removes unknown keys).

use crate::error::Violation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Policy for object keys not listed in `fields` and not covered by a
/// catchall schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeys {
    /// Unknown keys are dropped from the validated value (default).
    #[default]
    Strip,
    /// Unknown keys are violations.
    Strict,
    /// Unknown keys are kept as-is.
    Passthrough,
}

/// Shape description for object values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Explicitly declared fields. Every declared field is required.
    #[serde(default)]
    pub fields: BTreeMap<String, Schema>,

    /// What to do with keys that are neither declared nor caught.
    #[serde(default)]
    pub unknown_keys: UnknownKeys,

    /// Schema applied to keys not listed in `fields`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchall: Option<Box<Schema>>,
}

/// Typed description of a value's valid shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schema {
    /// Accepts any value.
    Any,
    String,
    Number,
    Boolean,
    Array {
        items: Box<Schema>,
    },
    Object(ObjectSchema),
}

impl Schema {
    /// An object schema with no fields and the default policy.
    pub fn empty_object() -> Self {
        Schema::Object(ObjectSchema::default())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Schema::Object(_))
    }
}

/// Validate `value` against `schema`, collecting every violation.
///
/// On success the returned value is a coerced copy: unknown keys are dropped
/// under the `strip` policy and kept under `passthrough`. The input is never
/// mutated.
pub fn validate(schema: &Schema, value: &Value) -> Result<Value, Vec<Violation>> {
    let mut violations = Vec::new();
    let coerced = check(schema, value, "$", &mut violations);
    if violations.is_empty() {
        Ok(coerced)
    } else {
        Err(violations)
    }
}

fn check(schema: &Schema, value: &Value, path: &str, out: &mut Vec<Violation>) -> Value {
    match schema {
        Schema::Any => value.clone(),
        Schema::String => expect_type(value, path, out, "string", Value::is_string),
        Schema::Number => expect_type(value, path, out, "number", Value::is_number),
        Schema::Boolean => expect_type(value, path, out, "boolean", Value::is_boolean),
        Schema::Array { items } => match value {
            Value::Array(elements) => Value::Array(
                elements
                    .iter()
                    .enumerate()
                    .map(|(index, element)| {
                        check(items, element, &format!("{path}[{index}]"), out)
                    })
                    .collect(),
            ),
            other => {
                out.push(Violation::new(
                    path,
                    format!("expected array, got {}", type_name(other)),
                ));
                other.clone()
            }
        },
        Schema::Object(object) => match value {
            Value::Object(map) => check_object(object, map, path, out),
            other => {
                out.push(Violation::new(
                    path,
                    format!("expected object, got {}", type_name(other)),
                ));
                other.clone()
            }
        },
    }
}

fn check_object(
    schema: &ObjectSchema,
    map: &Map<String, Value>,
    path: &str,
    out: &mut Vec<Violation>,
) -> Value {
    let mut result = Map::new();

    for (name, field_schema) in &schema.fields {
        let child_path = format!("{path}.{name}");
        match map.get(name) {
            Some(field_value) => {
                result.insert(name.clone(), check(field_schema, field_value, &child_path, out));
            }
            None => out.push(Violation::new(child_path, "required field is missing")),
        }
    }

    for (name, field_value) in map {
        if schema.fields.contains_key(name) {
            continue;
        }
        let child_path = format!("{path}.{name}");
        if let Some(catchall) = &schema.catchall {
            result.insert(name.clone(), check(catchall, field_value, &child_path, out));
        } else {
            match schema.unknown_keys {
                UnknownKeys::Strict => out.push(Violation::new(child_path, "unknown key")),
                UnknownKeys::Strip => {}
                UnknownKeys::Passthrough => {
                    result.insert(name.clone(), field_value.clone());
                }
            }
        }
    }

    Value::Object(result)
}

fn expect_type(
    value: &Value,
    path: &str,
    out: &mut Vec<Violation>,
    expected: &str,
    matches: fn(&Value) -> bool,
) -> Value {
    if !matches(value) {
        out.push(Violation::new(
            path,
            format!("expected {expected}, got {}", type_name(value)),
        ));
    }
    value.clone()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(fields: &[(&str, Schema)], unknown_keys: UnknownKeys) -> Schema {
        Schema::Object(ObjectSchema {
            fields: fields
                .iter()
                .map(|(name, schema)| (name.to_string(), schema.clone()))
                .collect(),
            unknown_keys,
            catchall: None,
        })
    }

    #[test]
    fn accepts_matching_value() {
        let schema = object(
            &[("name", Schema::String), ("count", Schema::Number)],
            UnknownKeys::Strict,
        );
        let value = json!({"name": "app", "count": 3});
        assert_eq!(validate(&schema, &value).unwrap(), value);
    }

    #[test]
    fn collects_all_violations_not_just_the_first() {
        let schema = object(
            &[("name", Schema::String), ("count", Schema::Number)],
            UnknownKeys::Strict,
        );
        let value = json!({"name": 1, "count": "three", "extra": true});
        let violations = validate(&schema, &value).unwrap_err();
        assert_eq!(violations.len(), 3);
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert!(paths.contains(&"$.name"));
        assert!(paths.contains(&"$.count"));
        assert!(paths.contains(&"$.extra"));
    }

    #[test]
    fn missing_required_field_is_a_violation() {
        let schema = object(&[("name", Schema::String)], UnknownKeys::Strip);
        let violations = validate(&schema, &json!({})).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.name");
    }

    #[test]
    fn strip_drops_unknown_keys() {
        let schema = object(&[("name", Schema::String)], UnknownKeys::Strip);
        let value = json!({"name": "app", "stray": 1});
        assert_eq!(validate(&schema, &value).unwrap(), json!({"name": "app"}));
    }

    #[test]
    fn passthrough_keeps_unknown_keys() {
        let schema = object(&[("name", Schema::String)], UnknownKeys::Passthrough);
        let value = json!({"name": "app", "stray": 1});
        assert_eq!(validate(&schema, &value).unwrap(), value);
    }

    #[test]
    fn catchall_validates_undeclared_keys() {
        let schema = Schema::Object(ObjectSchema {
            fields: BTreeMap::new(),
            unknown_keys: UnknownKeys::Strict,
            catchall: Some(Box::new(Schema::String)),
        });
        assert!(validate(&schema, &json!({"a": "x", "b": "y"})).is_ok());

        let violations = validate(&schema, &json!({"a": "x", "b": 2})).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.b");
    }

    #[test]
    fn array_elements_are_validated_with_indexed_paths() {
        let schema = Schema::Array {
            items: Box::new(Schema::Number),
        };
        let violations = validate(&schema, &json!([1, "two", 3])).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$[1]");
    }

    #[test]
    fn nested_paths_are_reported() {
        let inner = object(&[("port", Schema::Number)], UnknownKeys::Strip);
        let schema = object(&[("server", inner)], UnknownKeys::Strip);
        let violations = validate(&schema, &json!({"server": {"port": "eighty"}})).unwrap_err();
        assert_eq!(violations[0].path, "$.server.port");
    }

    #[test]
    fn schema_deserializes_from_declarative_yaml() {
        let yaml = r#"
type: object
unknown_keys: strict
fields:
  name: { type: string }
  scripts:
    type: object
    catchall: { type: string }
"#;
        let schema: Schema = serde_yaml::from_str(yaml).unwrap();
        let Schema::Object(object) = &schema else {
            panic!("expected object schema");
        };
        assert_eq!(object.unknown_keys, UnknownKeys::Strict);
        assert!(object.fields.contains_key("name"));
        let Some(Schema::Object(scripts)) = object.fields.get("scripts") else {
            panic!("expected nested object schema");
        };
        assert_eq!(scripts.catchall.as_deref(), Some(&Schema::String));
    }
}
