//! Parsing of structured (JSON) backend output

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use diarist_core::utils::single_line;
use diarist_core::{Error, Result};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("static regex"));

/// Find a JSON object in backend output: the whole text, a fenced block, or
/// the outermost braces inside surrounding prose
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&captures[1]) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn non_empty_field(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse `{"title": ..., "content": ...}`.
///
/// The title is flattened to one line. Missing or blank fields are a [`Error::Generation`], so the attempt is
/// retried like any other backend failure.
pub fn parse_titled(raw: &str) -> Result<(String, String)> {
    let object = extract_json_object(raw).ok_or_else(|| {
        Error::Generation("response does not contain a JSON object".to_string())
    })?;
    let title = non_empty_field(&object, &["title"])
        .map(|t| single_line(&t))
        .ok_or_else(|| Error::Generation("response has no title".to_string()))?;
    let body = non_empty_field(&object, &["content", "body"])
        .ok_or_else(|| Error::Generation("response has no content".to_string()))?;
    Ok((title, body))
}

/// Parse a flat object of string values, as returned for yearly backgrounds
pub fn parse_string_map(raw: &str) -> Result<BTreeMap<String, String>> {
    let object = extract_json_object(raw).ok_or_else(|| {
        Error::Generation("response does not contain a JSON object".to_string())
    })?;
    let Value::Object(map) = object else {
        return Err(Error::Generation("response is not an object".to_string()));
    };
    let parsed: BTreeMap<String, String> = map
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) if !s.trim().is_empty() => Some((k, s.trim().to_string())),
            _ => None,
        })
        .collect();
    if parsed.is_empty() {
        return Err(Error::Generation("response object has no text values".to_string()));
    }
    Ok(parsed)
}
