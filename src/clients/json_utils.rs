//! JSON extraction utilities for parsing model responses.
//!
//! Small local models often write a tool call as JSON text instead of using
//! the structured tool-call channel. These helpers recover such calls.

use serde_json::{Map, Value};

/// Extract a JSON block from model response text.
///
/// Handles two common patterns:
/// 1. JSON wrapped in ```json ... ``` code blocks
/// 2. Raw JSON objects (finds first { to last })
pub fn extract_json_block(text: &str) -> Option<&str> {
    // Look for ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end].trim());
        }
    }

    // Try finding raw JSON object
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && start < end
    {
        return Some(&text[start..=end]);
    }

    None
}

/// Recover a tool call written as JSON text, if it names `tool_name`.
///
/// Accepted shapes:
/// - `{"name": "...", "arguments": {...}}` (also `parameters` / `args`)
/// - `{"tool": "...", ...}` with the same argument keys
/// - a bare argument object when it carries every key in `required`
pub fn parse_inline_tool_call(text: &str, tool_name: &str, required: &[&str]) -> Option<Value> {
    let block = extract_json_block(text)?;
    let value: Value = serde_json::from_str(block).ok()?;
    let object = value.as_object()?;

    let named = object
        .get("name")
        .or_else(|| object.get("tool"))
        .and_then(Value::as_str);

    match named {
        Some(name) if name == tool_name => {
            let args = ["arguments", "parameters", "args"]
                .iter()
                .find_map(|key| object.get(*key))
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            // Some models double-encode the argument object
            match args {
                Value::String(s) => serde_json::from_str(&s).ok(),
                other => Some(other),
            }
        }
        Some(_) => None,
        None if !required.is_empty() && required.iter().all(|k| object.contains_key(*k)) => {
            Some(value)
        }
        None => None,
    }
}
