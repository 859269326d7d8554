//! Normalizes upstream reply bodies into plain text and recovers JSON objects
//! embedded in model output.
//!
//! Nothing here fails: a missing field yields an empty string or `None`.

use serde_json::Value;

/// Extracts the answer text from a provider body.
///
/// Looks at `choices[0].message.content` first (a string, or a list of text
/// blocks), then at a top-level `output_text`. Returns an empty string when
/// neither is present.
pub fn text_of(raw: &Value) -> String {
    if let Some(content) = raw.pointer("/choices/0/message/content") {
        match content {
            Value::String(text) => return text.trim().to_string(),
            Value::Array(parts) => {
                let joined: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                if !joined.trim().is_empty() {
                    return joined.trim().to_string();
                }
            }
            _ => {}
        }
    }

    raw.get("output_text")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

/// Best-effort recovery of a JSON object from free text.
///
/// Tries the whole text, then the span from the leftmost `{` to the rightmost
/// `}`. This can mis-extract when the text holds several JSON-like spans or
/// braces inside prose; callers must supply their own default on `None`.
pub fn json_of(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

/// Provider error message: `error.message`, or `error` itself when it is a string.
pub fn error_message_of(raw: &Value) -> Option<String> {
    match raw.get("error")? {
        Value::String(message) => Some(message.clone()),
        error => error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

/// Model identifier the provider reports in its reply.
pub fn provider_model_of(raw: &Value) -> Option<String> {
    raw.get("model").and_then(Value::as_str).map(String::from)
}
