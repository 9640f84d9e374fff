//! Theme palette resolution.
//!
//! The two dither colors come from the theme's custom properties:
//! `--clr-white` is the light color and `--clr-black-a10` (or the base
//! `--clr-black-a0`) the dark one. Two ways to get them exist: parsing the
//! stylesheet text directly, or resolving each property through a
//! computed-style lookup and parsing whatever color syntax comes back.

use bayer_dither::{Palette, Rgb};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Main content width when the theme does not declare one
pub const DEFAULT_MAIN_WIDTH: u32 = 840;

pub const LIGHT_VAR: &str = "--clr-white";
pub const DARK_VAR: &str = "--clr-black-a10";
pub const DARK_BASE_VAR: &str = "--clr-black-a0";

fn root_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":root\s*\{[\s\S]*?\}").unwrap())
}

fn main_width_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)--main-width:\s*([0-9.]+)px\s*;").unwrap())
}

fn rgb_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)rgba?\(([^)]+)\)").unwrap())
}

/// The first `:root { ... }` block in a stylesheet, if any.
pub fn root_block(css: &str) -> Option<&str> {
    root_block_re().find(css).map(|m| m.as_str())
}

/// Read `--<name>: rgb(r, g, b)` from CSS text.
///
/// `name` is given without the leading dashes. Only the plain integer
/// `rgb()` form is recognized here.
pub fn css_var_rgb(css: &str, name: &str) -> Option<Rgb> {
    let pattern = format!(
        r"(?i)--{}\s*:\s*rgb\((\d+),\s*(\d+),\s*(\d+)\)",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(css)?;
    let channel = |i: usize| -> Option<u8> {
        let v: u32 = caps.get(i)?.as_str().parse().ok()?;
        Some(v.min(255) as u8)
    };
    Some(Rgb::new(channel(1)?, channel(2)?, channel(3)?))
}

/// Resolve the palette from stylesheet text.
///
/// Returns `None` when there is no `:root` block or either color is missing;
/// callers substitute [`Palette::DEFAULT`].
pub fn palette_from_stylesheet(css: &str) -> Option<Palette> {
    let root = root_block(css)?;
    let light = css_var_rgb(root, &LIGHT_VAR[2..])?;
    let dark =
        css_var_rgb(root, &DARK_VAR[2..]).or_else(|| css_var_rgb(root, &DARK_BASE_VAR[2..]))?;
    Some(Palette::new(light, dark))
}

/// Parse a resolved CSS color: `#rgb`, `#rrggbb` or `rgb()`/`rgba()`.
///
/// Channels in the functional form may be separated by commas, spaces or a
/// slash and are rounded and clamped to 0..=255. Extra hex digits past six
/// (an alpha channel) are ignored.
pub fn parse_css_color(value: &str) -> Option<Rgb> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(hex) = s.strip_prefix('#') {
        let digit = |c: &str| u8::from_str_radix(c, 16).ok();
        if hex.len() == 3 && hex.is_ascii() {
            let expand = |i: usize| digit(&hex[i..i + 1].repeat(2));
            return Some(Rgb::new(expand(0)?, expand(1)?, expand(2)?));
        }
        if hex.len() >= 6 && hex.is_ascii() {
            return Some(Rgb::new(
                digit(&hex[0..2])?,
                digit(&hex[2..4])?,
                digit(&hex[4..6])?,
            ));
        }
    }

    let caps = rgb_fn_re().captures(s)?;
    let inner = caps.get(1)?.as_str().replace('/', " ");
    let parts: Vec<f64> = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .take(3)
        .map(|p| p.parse::<f64>().unwrap_or(f64::NAN))
        .collect();

    if parts.len() != 3 || parts.iter().any(|n| !n.is_finite()) {
        return None;
    }

    let clamp = |n: f64| n.round().clamp(0.0, 255.0) as u8;
    Some(Rgb::new(clamp(parts[0]), clamp(parts[1]), clamp(parts[2])))
}

/// Resolve the palette through a computed-style lookup.
///
/// `lookup` receives a custom property name and returns the color the
/// environment resolved it to. Each color that is missing or unparsable
/// falls back to default white/black on its own.
pub fn palette_from_computed<F>(lookup: F) -> Palette
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |name: &str, fallback: Rgb| {
        lookup(name)
            .as_deref()
            .and_then(parse_css_color)
            .unwrap_or(fallback)
    };
    Palette::new(
        resolve(LIGHT_VAR, Palette::DEFAULT.light),
        resolve(DARK_BASE_VAR, Palette::DEFAULT.dark),
    )
}

/// `--main-width` in pixels, or [`DEFAULT_MAIN_WIDTH`].
pub fn main_width_px(css: &str) -> u32 {
    main_width_re()
        .captures(css)
        .and_then(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .map(f64::round)
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_MAIN_WIDTH)
}

/// Theme values needed by the build pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub palette: Palette,
    pub main_width: u32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            palette: Palette::DEFAULT,
            main_width: DEFAULT_MAIN_WIDTH,
        }
    }
}

/// Build-time resolver reading the theme stylesheet from disk
#[derive(Debug, Clone)]
pub struct PaletteResolver {
    stylesheet: PathBuf,
}

impl PaletteResolver {
    pub fn new(stylesheet: impl AsRef<Path>) -> Self {
        Self {
            stylesheet: stylesheet.as_ref().to_path_buf(),
        }
    }

    /// Read the stylesheet and resolve palette and width.
    ///
    /// A missing or unreadable stylesheet yields the defaults.
    pub fn theme(&self) -> Theme {
        match std::fs::read_to_string(&self.stylesheet) {
            Ok(css) => {
                let palette = palette_from_stylesheet(&css).unwrap_or_else(|| {
                    tracing::debug!(
                        path = %self.stylesheet.display(),
                        "Stylesheet has no usable palette, using default"
                    );
                    Palette::DEFAULT
                });
                Theme {
                    palette,
                    main_width: main_width_px(&css),
                }
            }
            Err(e) => {
                tracing::debug!(%e, path = %self.stylesheet.display(), "Stylesheet not readable, using default theme");
                Theme::default()
            }
        }
    }
}
