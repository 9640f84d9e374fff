//! Which image nodes the runtime engine manages.

use super::environment::NodeSnapshot;
use crate::models::parse_boolean_str;
use regex::Regex;
use reqwest::Url;
use std::sync::OnceLock;

pub const OVERRIDE_ATTR: &str = "data-runtime-dither";
pub const HOVER_ORIGINAL_CLASS: &str = "dither-hover-original";

fn opt_out_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:no-dither|dither-off|sem-dither|original-only|invert|pixel)\b").unwrap()
    })
}

fn hover_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bhover-original\b").unwrap())
}

fn spaces_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

/// Decisions derived once from a node's alt text and attributes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSignals {
    pub exclude_from_dithering: bool,
    pub prefer_original_on_hover: bool,
    /// Alt text to write back when the hover keyword has to be removed;
    /// `Some(None)` removes the attribute
    pub cleaned_alt: Option<Option<String>>,
}

impl NodeSignals {
    pub fn from_snapshot(node: &NodeSnapshot) -> Self {
        let alt = node.alt();
        let exclude = alt.contains('<') || alt.contains('>') || opt_out_regex().is_match(alt);

        let from_attr = node
            .attr("data-hover-original")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let has_keyword = hover_regex().is_match(alt);

        let cleaned_alt = has_keyword.then(|| {
            let removed = hover_regex().replace(alt, "");
            let cleaned = spaces_regex().replace_all(&removed, " ").trim().to_string();
            (!cleaned.is_empty()).then_some(cleaned)
        });

        Self {
            exclude_from_dithering: exclude,
            prefer_original_on_hover: from_attr || has_keyword,
            cleaned_alt,
        }
    }
}

/// Per-node `data-runtime-dither` override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherOverride {
    Off,
    On,
    /// Manage when the source is on another origin
    External,
    /// Manage when the source is served by TMDB's image host
    Tmdb,
}

impl DitherOverride {
    pub fn parse(value: &str) -> Option<Self> {
        let mode = value.trim().to_ascii_lowercase();
        match mode.as_str() {
            "external" | "auto" => Some(DitherOverride::External),
            "tmdb" => Some(DitherOverride::Tmdb),
            other => match parse_boolean_str(other) {
                Some(true) => Some(DitherOverride::On),
                Some(false) => Some(DitherOverride::Off),
                None => None,
            },
        }
    }
}

fn resolve(src: &str, origin: &str) -> Option<Url> {
    let base = Url::parse(origin).ok()?;
    base.join(src.trim()).ok()
}

/// Whether `src` lives on a different origin than the page.
///
/// Sources that cannot be parsed are treated as same-origin.
pub fn is_external(src: &str, origin: &str) -> bool {
    match (resolve(src, origin), Url::parse(origin)) {
        (Some(url), Ok(page)) => url.origin() != page.origin(),
        _ => false,
    }
}

pub fn is_tmdb(src: &str, origin: &str) -> bool {
    resolve(src, origin)
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| host == "image.tmdb.org" || host.ends_with(".image.tmdb.org"))
}

/// Animated sources are recognised by the path extension
pub fn is_gif(src: &str, origin: &str) -> bool {
    match resolve(src, origin) {
        Some(url) => url.path().to_ascii_lowercase().ends_with(".gif"),
        None => {
            let lower = src.to_ascii_lowercase();
            let path = lower.split(['?', '#']).next().unwrap_or_default();
            path.ends_with(".gif")
        }
    }
}

/// Whether a node that is not yet processed should be managed
pub fn is_eligible(node: &NodeSnapshot, signals: &NodeSignals, origin: &str) -> bool {
    if node.tag != "img" || signals.exclude_from_dithering {
        return false;
    }
    if node.has_class(HOVER_ORIGINAL_CLASS) {
        return false;
    }

    let raw_override = node.attr(OVERRIDE_ATTR).filter(|v| !v.is_empty());
    if node.attr("aria-hidden") == Some("true") && raw_override.is_none() {
        return false;
    }

    let Some(src) = node.source() else {
        return false;
    };

    match raw_override.and_then(DitherOverride::parse) {
        Some(DitherOverride::Off) => false,
        Some(DitherOverride::On) => true,
        Some(DitherOverride::Tmdb) => is_tmdb(src, origin),
        Some(DitherOverride::External) | None => is_external(src, origin),
    }
}
