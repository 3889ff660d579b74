//! Argument validation against a tool's JSON parameter schema.
//!
//! Covers the subset tool schemas actually use: `type` (single or list),
//! `required`, `properties`, `additionalProperties`, `enum`, `items`,
//! `minimum` and `maximum`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Check `value` against `schema`, reporting the first mismatch with its JSON path.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, value, "$")
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            return Err(format!(
                "{path}: expected {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            let listed: Vec<String> = options.iter().map(Value::to_string).collect();
            return Err(format!("{path}: expected one of [{}]", listed.join(", ")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: {n} is below the minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: {n} is above the maximum {max}"));
            }
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path),
        Value::Array(elements) => {
            if let Some(items) = schema.get("items") {
                for (i, element) in elements.iter().enumerate() {
                    check(items, element, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_object(schema: &Map<String, Value>, fields: &Map<String, Value>, path: &str) -> Result<(), String> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                return Err(format!("{path}: missing required property '{key}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional = schema.get("additionalProperties");

    for (key, field) in fields {
        let field_path = format!("{path}.{key}");
        match properties.and_then(|p| p.get(key)) {
            Some(sub) => check(sub, field, &field_path)?,
            None => match additional {
                Some(Value::Bool(false)) => {
                    return Err(format!("{path}: unexpected property '{key}'"));
                }
                Some(sub @ Value::Object(_)) => check(sub, field, &field_path)?,
                _ => {}
            },
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => true,
    }
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
