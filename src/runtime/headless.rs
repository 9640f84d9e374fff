//! In-process document used by the live endpoint and by tests.
//!
//! Nodes carry a layout box and a load state instead of real layout. Image
//! bytes come from an [`ImageFetcher`], so tests can substitute a gated or
//! failing source for the network.

use super::environment::{
    BoxSize, FallbackReason, Measurements, NodeId, NodeSnapshot, Presentation, RenderEnvironment,
    RenderFailure, RgbaBuffer,
};
use super::watcher::DocumentEvent;
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageReader};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Error from fetching image bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Source of image bytes for a URL
#[async_trait]
pub trait ImageFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Cloneable handle to any fetcher, shared by every live render
#[derive(Clone)]
pub struct SharedFetcher(Arc<dyn ImageFetcher>);

impl SharedFetcher {
    pub fn new(fetcher: impl ImageFetcher) -> Self {
        Self(Arc::new(fetcher))
    }
}

#[async_trait]
impl ImageFetcher for SharedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.0.fetch(url).await
    }
}

/// Fetches over HTTP without cookies or credentials
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("duodither/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Whether a node's own image has loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded { width: u32, height: u32 },
    Failed,
}

/// One image node and what the viewer would see
#[derive(Debug, Clone)]
pub struct HeadlessNode {
    pub snapshot: NodeSnapshot,
    pub layout: Option<BoxSize>,
    pub load: LoadState,
    pub wrapped: bool,
    pub presentation: Option<Presentation>,
    pub hover_original: bool,
    /// Pixels composited over the node
    pub surface: Option<RgbaBuffer>,
}

impl HeadlessNode {
    fn new(snapshot: NodeSnapshot, layout: Option<BoxSize>) -> Self {
        Self {
            snapshot,
            layout,
            load: LoadState::Unloaded,
            wrapped: false,
            presentation: None,
            hover_original: false,
            surface: None,
        }
    }
}

pub struct HeadlessDocument<F: ImageFetcher> {
    origin: String,
    fetcher: F,
    nodes: Mutex<BTreeMap<NodeId, HeadlessNode>>,
    next_id: AtomicU64,
    stylesheet: Option<String>,
    computed: HashMap<String, String>,
    settings: HashMap<String, String>,
    events: Mutex<Option<mpsc::UnboundedSender<DocumentEvent>>>,
}

impl<F: ImageFetcher> HeadlessDocument<F> {
    pub fn new(origin: impl Into<String>, fetcher: F) -> Self {
        Self {
            origin: origin.into(),
            fetcher,
            nodes: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            stylesheet: None,
            computed: HashMap::new(),
            settings: HashMap::new(),
            events: Mutex::new(None),
        }
    }

    pub fn with_stylesheet(mut self, css: impl Into<String>) -> Self {
        self.stylesheet = Some(css.into());
        self
    }

    pub fn with_computed(mut self, name: &str, value: &str) -> Self {
        self.computed.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_setting(mut self, name: &str, value: &str) -> Self {
        self.settings.insert(name.to_string(), value.to_string());
        self
    }

    /// Start receiving mutation events; replaces any previous subscriber
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DocumentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.events) = Some(tx);
        rx
    }

    /// Close the event stream so a running watcher can finish
    pub fn close_events(&self) {
        lock(&self.events).take();
    }

    fn emit(&self, event: DocumentEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn insert_image(&self, snapshot: NodeSnapshot, layout: Option<BoxSize>) -> NodeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.nodes).insert(id, HeadlessNode::new(snapshot, layout));
        self.emit(DocumentEvent::Inserted(vec![id]));
        id
    }

    /// Set an attribute; a new `src` also resets the load state
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        {
            let mut nodes = lock(&self.nodes);
            let Some(entry) = nodes.get_mut(&node) else {
                return;
            };
            entry
                .snapshot
                .attributes
                .insert(name.to_ascii_lowercase(), value.to_string());
            if name.eq_ignore_ascii_case("src") {
                entry.snapshot.resolved_src = Some(value.to_string());
                entry.load = LoadState::Unloaded;
            }
        }
        self.emit(DocumentEvent::AttributeChanged {
            node,
            attribute: name.to_ascii_lowercase(),
        });
    }

    pub fn remove(&self, node: NodeId) {
        if lock(&self.nodes).remove(&node).is_some() {
            self.emit(DocumentEvent::Removed(node));
        }
    }

    /// Change a node's layout box and report a viewport resize
    pub fn resize(&self, node: NodeId, layout: BoxSize) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.layout = Some(layout);
        }
        self.emit(DocumentEvent::Resized);
    }

    /// Record that the node's own image already loaded, as from a cache
    pub fn mark_loaded(&self, node: NodeId, width: u32, height: u32) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.load = LoadState::Loaded { width, height };
        }
        self.emit(DocumentEvent::Loaded(node));
    }

    pub fn page_loaded(&self) {
        self.emit(DocumentEvent::PageLoaded);
    }

    pub fn node(&self, node: NodeId) -> Option<HeadlessNode> {
        lock(&self.nodes).get(&node).cloned()
    }

    pub fn image_nodes(&self) -> Vec<NodeId> {
        lock(&self.nodes)
            .iter()
            .filter(|(_, n)| n.snapshot.tag == "img")
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl<F: ImageFetcher> RenderEnvironment for HeadlessDocument<F> {
    type Image = DynamicImage;

    fn page_origin(&self) -> String {
        self.origin.clone()
    }

    fn snapshot(&self, node: NodeId) -> Option<NodeSnapshot> {
        lock(&self.nodes).get(&node).map(|n| n.snapshot.clone())
    }

    async fn wait_for_load(&self, node: NodeId) -> Result<(), RenderFailure> {
        let failed = |detail: String| RenderFailure::new(FallbackReason::DomImageLoadFailed, detail);

        let src = {
            let nodes = lock(&self.nodes);
            let entry = nodes.get(&node).ok_or_else(|| failed("node left document".into()))?;
            match entry.load {
                LoadState::Loaded { width, height } if width > 0 && height > 0 => return Ok(()),
                LoadState::Failed => return Err(failed("image failed to load".into())),
                _ => entry.snapshot.source().map(str::to_string),
            }
        };
        let src = src.ok_or_else(|| failed("no source".into()))?;

        let result = match self.fetcher.fetch(&src).await {
            Ok(bytes) => ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .map_err(|e| e.to_string())
                .and_then(|r| r.into_dimensions().map_err(|e| e.to_string())),
            Err(e) => Err(e.to_string()),
        };

        let mut nodes = lock(&self.nodes);
        let Some(entry) = nodes.get_mut(&node) else {
            return Err(failed("node left document".into()));
        };
        if entry.snapshot.source() != Some(src.as_str()) {
            // The source changed while loading; its own load is tracked anew
            return result.map(|_| ()).map_err(failed);
        }
        match result {
            Ok((width, height)) => {
                entry.load = LoadState::Loaded { width, height };
                Ok(())
            }
            Err(detail) => {
                entry.load = LoadState::Failed;
                Err(failed(detail))
            }
        }
    }

    fn measure(&self, node: NodeId) -> Measurements {
        let nodes = lock(&self.nodes);
        let Some(entry) = nodes.get(&node) else {
            return Measurements::default();
        };
        Measurements {
            node: entry.layout,
            wrapper: entry.wrapped.then_some(entry.layout).flatten(),
            natural: match entry.load {
                LoadState::Loaded { width, height } => Some((width, height)),
                _ => None,
            },
        }
    }

    async fn load_image(&self, url: &str) -> Result<DynamicImage, RenderFailure> {
        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| RenderFailure::new(FallbackReason::CorsImageLoadFailed, e.to_string()))?;
        image::load_from_memory(&bytes)
            .map_err(|e| RenderFailure::new(FallbackReason::DecodeFailed, e.to_string()))
    }

    fn rasterize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<RgbaBuffer, RenderFailure> {
        if width == 0 || height == 0 {
            return Err(RenderFailure::new(
                FallbackReason::MissingDimensions,
                "empty drawing surface",
            ));
        }
        let drawn = image.resize_exact(width, height, FilterType::Triangle).to_rgba8();
        Ok(RgbaBuffer {
            width,
            height,
            pixels: drawn.into_raw(),
        })
    }

    fn composite(&self, node: NodeId, buffer: &RgbaBuffer) -> Result<(), RenderFailure> {
        let mut nodes = lock(&self.nodes);
        let entry = nodes.get_mut(&node).ok_or_else(|| {
            RenderFailure::new(FallbackReason::RuntimeDitherFailed, "node left document")
        })?;
        entry.surface = Some(buffer.clone());
        Ok(())
    }

    fn set_presentation(&self, node: NodeId, presentation: Presentation, hover_original: bool) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.presentation = Some(presentation);
            entry.hover_original = hover_original;
            entry
                .snapshot
                .attributes
                .insert("data-runtime-dither-mode".into(), presentation.mode().into());
            match presentation {
                Presentation::Fallback(reason) => {
                    entry
                        .snapshot
                        .attributes
                        .insert("data-runtime-dither-error".into(), reason.code().into());
                }
                _ => {
                    entry.snapshot.attributes.remove("data-runtime-dither-error");
                }
            }
        }
    }

    fn clear_presentation(&self, node: NodeId) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.presentation = None;
            entry.hover_original = false;
            entry.snapshot.attributes.remove("data-runtime-dither-mode");
            entry.snapshot.attributes.remove("data-runtime-dither-error");
        }
    }

    fn ensure_wrapper(&self, node: NodeId) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.wrapped = true;
        }
    }

    fn teardown_wrapper(&self, node: NodeId) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            entry.wrapped = false;
            entry.surface = None;
        }
    }

    fn set_alt(&self, node: NodeId, alt: Option<&str>) {
        if let Some(entry) = lock(&self.nodes).get_mut(&node) {
            match alt {
                Some(alt) => {
                    entry.snapshot.attributes.insert("alt".into(), alt.to_string());
                }
                None => {
                    entry.snapshot.attributes.remove("alt");
                }
            }
        }
    }

    async fn stylesheet_text(&self) -> Option<String> {
        self.stylesheet.clone()
    }

    fn computed_custom_property(&self, name: &str) -> Option<String> {
        self.computed.get(name).cloned()
    }

    fn document_setting(&self, name: &str) -> Option<String> {
        self.settings.get(name).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
