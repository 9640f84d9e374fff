//! Front matter of page sources, used as the last word on the page opt-out.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^---\r?\n([\s\S]*?)\r?\n---(?:\r?\n|$)").unwrap())
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_-]+)\s*:\s*(.+?)\s*$").unwrap())
}

/// Extract the leading `---` delimited block of a page source.
///
/// The block is read as YAML first. Template sources often carry front
/// matter that is not valid YAML, so on failure the top-level `key: value`
/// lines are taken as plain strings instead.
pub fn parse_front_matter(content: &str) -> Option<Map<String, Value>> {
    let block = block_regex().captures(content)?.get(1)?.as_str();

    match serde_yaml::from_str::<Map<String, Value>>(block) {
        Ok(map) => Some(map),
        Err(e) => {
            tracing::debug!(error = %e, "Front matter is not YAML, reading key/value lines");
            Some(parse_simple_lines(block))
        }
    }
}

fn parse_simple_lines(block: &str) -> Map<String, Value> {
    let mut data = Map::new();
    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(caps) = line_regex().captures(trimmed) else {
            continue;
        };
        let value = unquote(&caps[2]);
        data.insert(caps[1].to_string(), Value::String(value.to_string()));
    }
    data
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
