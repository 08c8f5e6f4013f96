//! Recovery of a JSON payload from a free-text generative reply.
//!
//! Replies are requested as bare JSON but routinely arrive wrapped in a markdown fence,
//! prefixed with a sentence of prose, or both. Recovery runs in a fixed order:
//!
//! 1. trim, then strip one leading fence (```` ```json ```` or ```` ``` ````) and one
//!    trailing ```` ``` ````;
//! 2. for arrays only, slice from the first `[` to the last `]` when both exist;
//! 3. decode with `serde_json` and check the top-level shape.

use serde_json::{Map, Value};
use thiserror::Error;

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

#[derive(Debug, Error)]
pub(crate) enum PayloadError {
    #[error("reply is not valid JSON ({reason})")]
    InvalidJson { reason: String },
    #[error("expected a JSON array but found {found}")]
    NotAnArray { found: &'static str },
    #[error("expected a JSON object but found {found}")]
    NotAnObject { found: &'static str },
}

pub(crate) fn strip_code_fence(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix(JSON_FENCE) {
        text = rest;
    } else if let Some(rest) = text.strip_prefix(FENCE) {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

/// Slice spanning the first `open` through the last `close`, inclusive.
pub(crate) fn slice_enclosed(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub(crate) fn extract_json_array(reply: &str) -> Result<Vec<Value>, PayloadError> {
    let unfenced = strip_code_fence(reply);
    let candidate = slice_enclosed(unfenced, '[', ']').unwrap_or(unfenced);

    match decode(candidate)? {
        Value::Array(items) => Ok(items),
        other => Err(PayloadError::NotAnArray { found: kind_of(&other) }),
    }
}

pub(crate) fn extract_json_object(reply: &str) -> Result<Map<String, Value>, PayloadError> {
    match decode(strip_code_fence(reply))? {
        Value::Object(map) => Ok(map),
        other => Err(PayloadError::NotAnObject { found: kind_of(&other) }),
    }
}

/// First `max_chars` characters of `text`, for logs and error details.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn decode(text: &str) -> Result<Value, PayloadError> {
    serde_json::from_str(text).map_err(|err| PayloadError::InvalidJson { reason: err.to_string() })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
