//! Extraction of `<tool_use>` blocks from free-form model output.

use crate::agent::ToolCatalog;
use crate::traits::ToolInvocationRequest;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

pub const TOOL_USE_OPEN: &str = "<tool_use>";

static TOOL_USE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_use>.*?<name>(.*?)</name>.*?<arguments>(.*?)</arguments>.*?</tool_use>")
        .expect("tool use pattern is valid")
});

/// Returns every complete `<tool_use>` block in `text`, in order of
/// appearance. Arguments that are not a JSON object become `{}`.
pub fn parse_tool_uses(text: &str) -> Vec<ToolInvocationRequest> {
    let mut requests = Vec::new();
    let mut pos = 0;

    while let Some(caps) = TOOL_USE_PATTERN.captures_at(text, pos) {
        let whole = caps.get(0).map_or(pos..text.len(), |m| m.range());

        // An unclosed block followed by a complete one: restart at the inner tag.
        if let Some(inner) = text[whole.start + TOOL_USE_OPEN.len()..whole.end].find(TOOL_USE_OPEN) {
            pos = whole.start + TOOL_USE_OPEN.len() + inner;
            continue;
        }

        let name = caps.get(1).map_or("", |m| m.as_str()).trim();
        let raw_args = caps.get(2).map_or("", |m| m.as_str());
        requests.push(ToolInvocationRequest::new(name, parse_arguments(raw_args)));
        pos = whole.end;
    }

    requests
}

/// `text` with every complete `<tool_use>` block removed.
pub fn strip_tool_uses(text: &str) -> String {
    TOOL_USE_PATTERN.replace_all(text, "").trim().to_string()
}

/// Keeps the requests whose tool is in `catalog`.
pub fn filter_known(
    requests: Vec<ToolInvocationRequest>,
    catalog: &ToolCatalog,
) -> Vec<ToolInvocationRequest> {
    requests
        .into_iter()
        .filter(|r| catalog.contains(&r.tool_name))
        .collect()
}

fn parse_arguments(raw: &str) -> Value {
    let payload = strip_code_fence(raw.trim());
    if payload.is_empty() {
        return Value::Object(Map::new());
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            debug!(arguments = %other, "Tool arguments are not an object, using {{}}");
            Value::Object(Map::new())
        }
        Err(e) => {
            debug!(error = %e, "Malformed tool arguments, using {{}}");
            Value::Object(Map::new())
        }
    }
}

fn strip_code_fence(payload: &str) -> &str {
    let Some(rest) = payload.strip_prefix("```") else {
        return payload;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim()
}
