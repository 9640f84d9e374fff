//! Per-page settings handed over by the templating system.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Keys that switch dithering off when truthy
const DISABLE_KEYS: [&str; 3] = ["noDither", "disableDither", "ditherDisabled"];

/// What the templating layer knows about the page being transformed.
///
/// `ctx` and `data` are consulted in that order; front matter from
/// `input_path` is only read when neither decides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub ctx: Option<Map<String, Value>>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub input_path: Option<PathBuf>,
}

impl PageContext {
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn with_input_path(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: Some(input_path.into()),
            ..Default::default()
        }
    }

    /// Decision from the in-memory candidates, ignoring front matter
    pub fn disable_from_data(&self) -> Option<bool> {
        [self.ctx.as_ref(), self.data.as_ref()]
            .into_iter()
            .flatten()
            .find_map(dither_disable_value)
    }
}

/// Interpret a loosely typed flag.
///
/// Accepts JSON booleans, the numbers 1 and 0, and the usual yes/no
/// spellings in any case. Anything else is undecided.
pub fn parse_boolean_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => parse_boolean_str(s),
        _ => None,
    }
}

pub fn parse_boolean_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" | "enabled" => Some(true),
        "false" | "0" | "no" | "n" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Whether page data asks to disable dithering.
///
/// `Some(true)` disables, `Some(false)` explicitly keeps dithering, `None`
/// means the data says nothing usable.
pub fn dither_disable_value(data: &Map<String, Value>) -> Option<bool> {
    for key in DISABLE_KEYS {
        if let Some(parsed) = data.get(key).and_then(parse_boolean_like) {
            return Some(parsed);
        }
    }

    let mode = data.get("dither")?;
    if let Some(enabled) = parse_boolean_like(mode) {
        return Some(!enabled);
    }
    match mode.as_str().map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if s == "none" || s == "original" => Some(true),
        Some(s) if s == "dither" => Some(false),
        _ => None,
    }
}
