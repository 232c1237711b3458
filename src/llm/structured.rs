//! Defensive parsing of structured (JSON) model output.

use serde_json::{Map, Value};

/// Extract a JSON object from model output, tolerating markdown fences and
/// surrounding prose.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Parse model output into a JSON object. Anything that is not an object
/// yields an empty map.
pub fn parse_json_object(text: &str) -> Map<String, Value> {
    let candidate = extract_json_object(text);
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(kind = %json_kind(&other), "Structured output was not a JSON object");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, raw = %text, "Failed to parse structured output");
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
