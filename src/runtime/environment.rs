//! Capabilities the runtime engine needs from a live document.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of an image node within one document
pub type NodeId = u64;

/// Read-only view of an image node at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Lowercase element name
    pub tag: String,
    /// Attributes with lowercase names
    pub attributes: BTreeMap<String, String>,
    /// The source the document actually uses, after `srcset` selection
    pub resolved_src: Option<String>,
}

impl NodeSnapshot {
    pub fn image(src: impl Into<String>) -> Self {
        let src = src.into();
        let mut attributes = BTreeMap::new();
        attributes.insert("src".to_string(), src.clone());
        Self {
            tag: "img".to_string(),
            attributes,
            resolved_src: Some(src),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    /// The `alt` attribute, empty when absent
    pub fn alt(&self) -> &str {
        self.attr("alt").unwrap_or_default()
    }

    /// `resolved_src`, falling back to the raw `src` attribute
    pub fn source(&self) -> Option<&str> {
        self.resolved_src
            .as_deref()
            .or_else(|| self.attr("src"))
            .filter(|s| !s.trim().is_empty())
    }
}

/// A laid-out box in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoxSize {
    pub width: f64,
    pub height: f64,
}

impl BoxSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Everything the engine reads to size a render
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub node: Option<BoxSize>,
    pub wrapper: Option<BoxSize>,
    /// Intrinsic pixel size of the loaded image
    pub natural: Option<(u32, u32)>,
}

/// RGBA pixels drawn off screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Why a node shows its original instead of a live render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// The node's own image never loaded
    DomImageLoadFailed,
    /// The anonymous fetch failed, was refused or timed out
    CorsImageLoadFailed,
    MissingDimensions,
    /// Animated formats are not dithered frame by frame
    GifNotCanvasDithered,
    DecodeFailed,
    RuntimeDitherFailed,
}

impl FallbackReason {
    pub fn code(self) -> &'static str {
        match self {
            FallbackReason::DomImageLoadFailed => "dom_image_load_failed",
            FallbackReason::CorsImageLoadFailed => "cors_image_load_failed",
            FallbackReason::MissingDimensions => "missing_dimensions",
            FallbackReason::GifNotCanvasDithered => "gif_not_canvas_dithered",
            FallbackReason::DecodeFailed => "decode_failed",
            FallbackReason::RuntimeDitherFailed => "runtime_dither_failed",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed render step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct RenderFailure {
    pub reason: FallbackReason,
    pub detail: String,
}

impl RenderFailure {
    pub fn new(reason: FallbackReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// What the viewer currently sees for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Original visible, a render is under way
    Pending,
    /// Dithered surface visible, original kept underneath
    Ready,
    /// Original visible
    Fallback(FallbackReason),
    /// Opted out through its alt text; no wrapper
    OptOut,
}

impl Presentation {
    /// Marker written on the node, mirrored by the HTTP surface
    pub fn mode(&self) -> &'static str {
        match self {
            Presentation::Pending => "pending",
            Presentation::Ready => "canvas",
            Presentation::Fallback(FallbackReason::GifNotCanvasDithered) => "fallback-gif",
            Presentation::Fallback(_) => "fallback",
            Presentation::OptOut => "optout-alt",
        }
    }
}

/// Capability interface over a live document.
///
/// Synchronous methods correspond to immediate document reads and writes;
/// the engine calls them while it holds a node's job, so they must not call
/// back into the engine. Only loading and fetching may suspend.
#[async_trait]
pub trait RenderEnvironment: Send + Sync + 'static {
    /// A decoded image obtained by [`RenderEnvironment::load_image`]
    type Image: Send + Sync + 'static;

    /// Origin of the page, e.g. `https://example.org`
    fn page_origin(&self) -> String;

    /// Current state of a node, `None` once it left the document
    fn snapshot(&self, node: NodeId) -> Option<NodeSnapshot>;

    /// Resolve once the node's own image has loaded
    async fn wait_for_load(&self, node: NodeId) -> Result<(), RenderFailure>;

    fn measure(&self, node: NodeId) -> Measurements;

    /// Fetch and decode an image without credentials
    async fn load_image(&self, url: &str) -> Result<Self::Image, RenderFailure>;

    /// Draw `image` scaled to `width` x `height` and read its pixels back
    fn rasterize(
        &self,
        image: &Self::Image,
        width: u32,
        height: u32,
    ) -> Result<RgbaBuffer, RenderFailure>;

    /// Put pixels on the node's surface without smoothing
    fn composite(&self, node: NodeId, buffer: &RgbaBuffer) -> Result<(), RenderFailure>;

    fn set_presentation(&self, node: NodeId, presentation: Presentation, hover_original: bool);

    /// Drop every presentation marker from a node that is no longer managed
    fn clear_presentation(&self, node: NodeId);

    /// Wrap the node so a surface can sit on top of it
    fn ensure_wrapper(&self, node: NodeId);

    /// Put the node back where it was and drop the wrapper
    fn teardown_wrapper(&self, node: NodeId);

    /// Replace the alt text; `None` removes the attribute
    fn set_alt(&self, node: NodeId, alt: Option<&str>);

    /// Text of the theme stylesheet, when reachable
    async fn stylesheet_text(&self) -> Option<String>;

    /// Computed color of a custom property such as `--clr-white`
    fn computed_custom_property(&self, name: &str) -> Option<String>;

    /// Per-document setting such as `bayer-size`
    fn document_setting(&self, name: &str) -> Option<String>;
}
