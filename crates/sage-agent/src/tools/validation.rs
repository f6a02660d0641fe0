//! Argument validation against a tool's JSON schema.
//!
//! Only the subset tools actually declare is checked: the arguments must be
//! an object, `required` properties must be present, and declared primitive
//! `type`s and `enum`s must match. Unknown properties pass through.

use serde_json::Value as JsonValue;

use sage_core::{Error, Result};

fn type_matches(expected: &str, value: &JsonValue) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub fn validate_arguments(schema: &JsonValue, args: &JsonValue) -> Result<()> {
    let Some(object) = args.as_object() else {
        return Err(Error::InvalidInput(format!(
            "Arguments must be an object, got {}",
            type_name(args)
        )));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            match object.get(field) {
                None | Some(JsonValue::Null) => {
                    return Err(Error::InvalidInput(format!(
                        "Missing required field '{}'",
                        field
                    )))
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (name, value) in object {
        let Some(prop) = properties.get(name) else {
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
            if !type_matches(expected, value) {
                return Err(Error::InvalidInput(format!(
                    "Field '{}' must be {}, got {}",
                    name,
                    expected,
                    type_name(value)
                )));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(Error::InvalidInput(format!(
                    "Field '{}' must be one of {}",
                    name,
                    JsonValue::Array(allowed.clone())
                )));
            }
        }
    }
    Ok(())
}
