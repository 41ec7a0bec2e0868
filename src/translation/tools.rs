// Tool definition validation and schema normalization

use crate::error::{ProxyError, Result};
use crate::models::canonical::ToolDefinition;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Longest tool name the backend accepts.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Builds a canonical tool definition, rejecting schemas the backend cannot
/// represent.
pub fn build_tool(name: &str, description: Option<&str>, schema: Option<Value>) -> Result<ToolDefinition> {
    if name.trim().is_empty() {
        return Err(ProxyError::Validation("tool name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_TOOL_NAME_LEN {
        return Err(ProxyError::Validation(format!(
            "tool name '{}' exceeds {} characters",
            name, MAX_TOOL_NAME_LEN
        )));
    }

    // A function without parameters is an empty object schema.
    let schema = schema.unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    let parameters = normalize_schema(schema);

    let is_object = parameters.is_object()
        && parameters
            .get("type")
            .and_then(Value::as_str)
            .map_or(true, |t| t == "object");
    if !is_object {
        return Err(ProxyError::Validation(format!(
            "tool '{}' has a schema that is not a JSON object schema",
            name
        )));
    }

    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Tool: {}", name));

    Ok(ToolDefinition {
        name: name.to_string(),
        description,
        parameters,
    })
}

/// Rejects duplicate tool names within one request.
pub fn ensure_unique(tools: &[ToolDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(ProxyError::Validation(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
    }
    Ok(())
}

/// Normalize a JSON schema for the backend.
///
/// Meta keywords are dropped, `additionalProperties` is removed, empty
/// `required` arrays are removed, and objects with `properties` but no `type`
/// get `"type": "object"`. Property names themselves are never touched.
pub fn normalize_schema(schema: Value) -> Value {
    const FORBIDDEN: &[&str] = &["$schema", "$id", "$comment", "additionalProperties"];

    let schema = remove_keys(schema, FORBIDDEN, false);
    let mut schema = ensure_type_fields(schema);
    if let Value::Object(map) = &mut schema {
        if !map.contains_key("type") {
            map.insert("type".to_string(), json!("object"));
        }
    }
    schema
}

fn remove_keys(value: Value, forbidden: &[&str], inside_properties: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if !inside_properties && forbidden.contains(&key.as_str()) {
                    continue;
                }
                if !inside_properties && key == "required" {
                    if let Value::Array(items) = &v {
                        if items.is_empty() {
                            continue;
                        }
                    }
                }
                // Children of "properties" are property names, not keywords.
                let entering_properties = !inside_properties && key == "properties";
                out.insert(key, remove_keys(v, forbidden, entering_properties));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(
            arr.into_iter()
                .map(|v| remove_keys(v, forbidden, false))
                .collect(),
        ),
        other => other,
    }
}

fn ensure_type_fields(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if !map.contains_key("type")
                && !map.contains_key("anyOf")
                && !map.contains_key("allOf")
                && !map.contains_key("oneOf")
                && map.contains_key("properties")
            {
                map.insert("type".to_string(), json!("object"));
            }

            for (_, v) in map.iter_mut() {
                *v = ensure_type_fields(v.take());
            }

            Value::Object(map)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(ensure_type_fields).collect()),
        other => other,
    }
}
