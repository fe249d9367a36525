//! Minimal JSON-schema argument checks
//!
//! Covers what tool schemas published by Home Assistant actually use:
//! an object with `properties`, `required` and primitive `type`s.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Validate tool arguments against an input schema.
///
/// Null members are dropped (a model often sends `null` for optional
/// arguments). When the schema declares `properties`, undeclared members are
/// dropped as well.
pub fn validate_arguments(schema: &Value, args: Value) -> Result<Map<String, Value>> {
    let mut args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(Error::Tool(format!(
                "arguments must be a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    args.retain(|_, value| !value.is_null());

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        args.retain(|key, _| {
            let declared = properties.contains_key(key);
            if !declared {
                tracing::debug!(argument = %key, "Dropping undeclared argument");
            }
            declared
        });

        for (key, value) in &args {
            if let Some(expected) = properties.get(key).and_then(|p| p.get("type")) {
                if !matches_type(expected, value) {
                    return Err(Error::Tool(format!(
                        "argument '{}' must be of type {}, got {}",
                        key,
                        expected,
                        type_name(value)
                    )));
                }
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                return Err(Error::Tool(format!("missing required argument '{}'", key)));
            }
        }
    }

    Ok(args)
}

/// `type` may be a single name or a list of alternatives
fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_name(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_name(name, value)),
        // Unknown constraint shape, accept
        _ => true,
    }
}

fn matches_name(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
