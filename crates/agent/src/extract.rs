use serde_json::{Map, Value};

pub const FENCE_OPEN: &str = "```json";
pub const FENCE_CLOSE: &str = "```";

/// Finds the first "```json" fence whose body opens with `{` and parses it.
///
/// Fences whose body opens with anything else are skipped. The first fence opening
/// with `{` is the only candidate: if its body up to the closing fence is not a JSON
/// object the result is `None` and later fences are not consulted.
pub fn extract(reply: &str) -> Option<Map<String, Value>> {
    let mut cursor = 0;

    while let Some(offset) = reply[cursor..].find(FENCE_OPEN) {
        let body_start = cursor + offset + FENCE_OPEN.len();
        let body_len = reply[body_start..].find(FENCE_CLOSE)?;
        let body = reply[body_start..body_start + body_len].trim();

        if body.starts_with('{') {
            return match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(object)) => Some(object),
                _ => None,
            };
        }

        cursor = body_start + body_len + FENCE_CLOSE.len();
    }

    None
}

/// Best-effort JSON object recovery for classifier verdicts: the whole text, then a
/// fenced block, then the first balanced `{...}` span.
pub fn parse_object_lenient(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        return Some(object);
    }
    if let Some(object) = extract(trimmed) {
        return Some(object);
    }

    let span = balanced_object_span(trimmed)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn balanced_object_span(raw: &str) -> Option<&str> {
    let mut start = None;
    let mut depth: i32 = 0;
    for (idx, ch) in raw.char_indices() {
        if ch == '{' {
            if start.is_none() {
                start = Some(idx);
            }
            depth += 1;
        } else if ch == '}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                return start.map(|s| &raw[s..=idx]);
            }
        }
    }
    None
}
