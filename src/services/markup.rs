//! Attribute surgery on raw `<img>` tags.
//!
//! Pages are rewritten textually so everything outside the touched tags is
//! byte-for-byte what the templating layer produced. `scraper` is only used
//! where document structure matters (ancestor checks for hover wrapping).

use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::OnceLock;

pub const HOVER_KEYWORD: &str = "hover-original";
pub const HOVER_ATTR: &str = "data-hover-original";
pub const HOVER_CLASS: &str = "dither-hover-swap";
pub const HOVER_LINK_CLASS: &str = "hover-original-link";

/// Every `<img ...>` start tag in a page
pub fn img_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<img\b[^>]*>").unwrap())
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\s+([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#).unwrap()
    })
}

fn hover_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(HOVER_KEYWORD))).unwrap())
}

/// Comments and raw-text elements, whose `<img` text is not an element
fn non_element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?is)<!--.*?(?:-->|$)",
            r"|<script\b.*?(?:</script\s*>|$)",
            r"|<style\b.*?(?:</style\s*>|$)",
            r"|<textarea\b.*?(?:</textarea\s*>|$)",
            r"|<noscript\b.*?(?:</noscript\s*>|$)",
        ))
        .unwrap()
    })
}

fn multi_space_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

struct AttrSpan {
    /// Leading whitespace through the end of the value
    whole: Range<usize>,
    name: Range<usize>,
    value: Option<Range<usize>>,
}

/// Attributes of a start tag, in source order
fn attributes(tag: &str) -> Vec<AttrSpan> {
    // Skip "<img" (or any tag name) before scanning
    let start = tag
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_whitespace() || *c == '>' || *c == '/')
        .map(|(i, _)| i)
        .unwrap_or(tag.len());

    attr_regex()
        .captures_iter(&tag[start..])
        .filter_map(|caps: Captures| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            let value = caps.get(2).or(caps.get(3)).or(caps.get(4));
            Some(AttrSpan {
                whole: start + whole.start()..start + whole.end(),
                name: start + name.start()..start + name.end(),
                value: value.map(|v| start + v.start()..start + v.end()),
            })
        })
        .collect()
}

fn find_attr(tag: &str, name: &str) -> Option<AttrSpan> {
    attributes(tag)
        .into_iter()
        .find(|a| tag[a.name.clone()].eq_ignore_ascii_case(name))
}

pub fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(value: &str) -> String {
    value.replace("&quot;", "\"").replace("&amp;", "&")
}

/// Value of an attribute, `None` when absent or empty
pub fn get_attr(tag: &str, name: &str) -> Option<String> {
    let span = find_attr(tag, name)?;
    let value = unescape_attr(&tag[span.value?]);
    (!value.is_empty()).then_some(value)
}

pub fn has_attr(tag: &str, name: &str) -> bool {
    find_attr(tag, name).is_some()
}

/// Set an attribute, replacing an existing one in place or appending it
pub fn set_attr(tag: &str, name: &str, value: &str) -> String {
    let rendered = format!(" {name}=\"{}\"", escape_attr(value));
    match find_attr(tag, name) {
        Some(span) => format!("{}{}{}", &tag[..span.whole.start], rendered, &tag[span.whole.end..]),
        None => {
            let end = if tag.ends_with("/>") {
                tag.len() - 2
            } else {
                tag.len() - 1
            };
            let head = tag[..end].trim_end();
            format!("{head}{rendered}{}", &tag[end..])
        }
    }
}

pub fn remove_attr(tag: &str, name: &str) -> String {
    match find_attr(tag, name) {
        Some(span) => format!("{}{}", &tag[..span.whole.start], &tag[span.whole.end..]),
        None => tag.to_string(),
    }
}

pub fn has_class(tag: &str, class: &str) -> bool {
    get_attr(tag, "class").is_some_and(|c| c.split_whitespace().any(|c| c == class))
}

pub fn add_class(tag: &str, class: &str) -> String {
    match get_attr(tag, "class") {
        None => set_attr(tag, "class", class),
        Some(current) => {
            let mut classes: Vec<&str> = current.split_whitespace().collect();
            if classes.contains(&class) {
                return tag.to_string();
            }
            classes.push(class);
            set_attr(tag, "class", &classes.join(" "))
        }
    }
}

/// Look for the hover keyword in alt text.
///
/// Returns whether it was present and the alt with the keyword removed,
/// spaces collapsed and trimmed.
pub fn strip_hover_keyword(alt: &str) -> (bool, String) {
    if !hover_keyword_regex().is_match(alt) {
        return (false, alt.to_string());
    }
    let removed = hover_keyword_regex().replace(alt, "");
    let cleaned = multi_space_regex().replace_all(&removed, " ");
    (true, cleaned.trim().to_string())
}

fn is_hover_tag(tag: &str) -> bool {
    get_attr(tag, HOVER_ATTR).as_deref() == Some("true") && has_attr(tag, "data-original-src")
}

/// Wrap hover-original images in a link to the original.
///
/// Images already inside an `<a>` or inside a `.gallery` element are left
/// alone; the gallery supplies its own viewer.
pub fn wrap_hover_images(html: &str) -> String {
    if !html.contains(HOVER_ATTR) {
        return html.to_string();
    }

    // Structure from the parsed tree, in document order
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("img[data-hover-original='true'][data-original-src]") else {
        return html.to_string();
    };
    let mut verdicts: HashMap<String, VecDeque<bool>> = HashMap::new();
    for img in document.select(&selector) {
        let original = img.value().attr("data-original-src").unwrap_or_default();
        verdicts
            .entry(original.to_string())
            .or_default()
            .push_back(!inside_link_or_gallery(&img));
    }

    // Textual matches the parser never saw as elements
    let skipped: Vec<Range<usize>> = non_element_regex()
        .find_iter(html)
        .map(|m| m.range())
        .collect();

    img_tag_regex()
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            if !is_hover_tag(tag) || skipped.iter().any(|r| r.contains(&start)) {
                return tag.to_string();
            }
            let original = get_attr(tag, "data-original-src").unwrap_or_default();
            match verdicts.get_mut(&original).and_then(VecDeque::pop_front) {
                Some(true) => format!(
                    "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\" class=\"{HOVER_LINK_CLASS}\">{tag}</a>",
                    escape_attr(&original)
                ),
                _ => tag.to_string(),
            }
        })
        .into_owned()
}

fn inside_link_or_gallery(img: &ElementRef) -> bool {
    img.ancestors().filter_map(ElementRef::wrap).any(|el| {
        el.value().name() == "a" || el.value().classes().any(|c| c == "gallery")
    })
}
