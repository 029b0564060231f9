//! Recovers a JSON object from raw model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static THINK_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(think|thinking|reasoning)>.*?</(think|thinking|reasoning)>").expect("valid regex")
});

/// Recover the assessment object from model output.
///
/// Reasoning blocks are removed first. The first fenced block (any language
/// tag) whose body is an object wins; fenced arrays, prose and examples in
/// other fences are skipped. Without a usable fence the outermost `{...}`
/// span of the remaining text is taken.
pub fn extract_json_block(raw: &str) -> Option<String> {
    let text = THINK_BLOCK_RE.replace_all(raw, "");
    let text = text.trim();

    if let Some(block) = fenced_blocks(text).find(|b| b.starts_with('{')) {
        return Some(block.to_string());
    }
    outermost_object(text).map(str::to_string)
}

/// Bodies of ``` fences in order, without the info string.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    text.split("```").skip(1).step_by(2).map(|block| {
        let body = match block.split_once('\n') {
            Some((info, body)) if !info.trim_start().starts_with(['{', '[']) => body,
            _ => block,
        };
        body.trim()
    })
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse model output into a JSON object.
pub fn parse_assessment(raw: &str) -> Result<Map<String, Value>, String> {
    let block = extract_json_block(raw).ok_or_else(|| "no JSON object in model output".to_string())?;
    match serde_json::from_str::<Value>(&block) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
