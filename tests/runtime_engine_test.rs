//! Tests for the live render engine over the headless document.

mod common;

use async_trait::async_trait;
use common::fixtures::{gradient_png, solid_png, tiny_gif};
use duodither::runtime::{
    bootstrap, BoxSize, FallbackReason, FetchError, HeadlessDocument, ImageFetcher, NodeId,
    NodeSnapshot, Presentation, ProcessOutcome, RenderEngine, RenderState, SharedFetcher,
    BAYER_SIZE_SETTING,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const ORIGIN: &str = "https://blog.example";
const WHITE: &str = "https://cdn.example/white.png";
const BLACK: &str = "https://cdn.example/black.png";

/// In-memory image host with optional gates and delays per URL
#[derive(Default)]
struct StubFetcher {
    images: HashMap<String, Vec<u8>>,
    gates: HashMap<String, Arc<Semaphore>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), bytes);
        self
    }

    /// Hold fetches of `url` until permits are added to the returned gate
    fn gated(&mut self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.insert(url.to_string(), gate.clone());
        gate
    }

    fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(gate) = self.gates.get(url) {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;
        }
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.images.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

fn two_images() -> StubFetcher {
    StubFetcher::default()
        .with_image(WHITE, solid_png(8, 8, [255, 255, 255, 255]))
        .with_image(BLACK, solid_png(8, 8, [0, 0, 0, 255]))
}

fn engine(doc: &Arc<HeadlessDocument<StubFetcher>>) -> Arc<RenderEngine<HeadlessDocument<StubFetcher>>> {
    Arc::new(RenderEngine::new(doc.clone(), Duration::from_secs(5)))
}

fn surface_is(doc: &HeadlessDocument<StubFetcher>, node: NodeId, rgb: [u8; 3]) -> bool {
    let surface = doc.node(node).and_then(|n| n.surface).expect("no surface");
    surface
        .pixels
        .chunks_exact(4)
        .all(|px| px[..3] == rgb)
}

#[tokio::test]
async fn test_cross_origin_image_renders_with_default_palette() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(6.0, 3.0)));
    let engine = engine(&doc);

    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);
    assert_eq!(engine.state(node), Some(RenderState::Ready));

    let rendered = doc.node(node).unwrap();
    assert!(rendered.wrapped);
    assert_eq!(rendered.presentation, Some(Presentation::Ready));
    assert_eq!(
        rendered.snapshot.attr("data-runtime-dither-mode"),
        Some("canvas")
    );
    let surface = rendered.surface.unwrap();
    assert_eq!((surface.width, surface.height), (6, 3));
    assert!(surface_is(&doc, node, [255, 255, 255]));

    // Already processed under the current token
    assert_eq!(engine.process(node).await, ProcessOutcome::Skipped);
}

#[tokio::test]
async fn test_same_origin_image_is_not_managed() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(
        NodeSnapshot::image("/assets/img/local.png"),
        Some(BoxSize::new(8.0, 8.0)),
    );
    let engine = engine(&doc);

    assert_eq!(engine.process(node).await, ProcessOutcome::Skipped);
    assert_eq!(engine.state(node), None);
    assert!(!doc.node(node).unwrap().wrapped);
}

#[tokio::test]
async fn test_only_latest_token_commits() {
    let mut fetcher = two_images();
    let gate = fetcher.gated(BLACK);
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, fetcher));
    let node = doc.insert_image(NodeSnapshot::image(BLACK), Some(BoxSize::new(8.0, 8.0)));
    let engine = engine(&doc);

    // Token 1 suspends while its image loads
    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.process(node).await }
    });
    while engine.token(node) != Some(1) {
        tokio::task::yield_now().await;
    }

    // Token 2 starts and finishes while token 1 is still waiting
    doc.set_attribute(node, "src", WHITE);
    engine.invalidate(node);
    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);
    assert_eq!(engine.token(node), Some(2));

    gate.add_permits(16);
    assert_eq!(first.await.unwrap(), ProcessOutcome::Superseded);

    assert_eq!(engine.state(node), Some(RenderState::Ready));
    assert!(surface_is(&doc, node, [255, 255, 255]));
}

#[tokio::test]
async fn test_tokens_keep_increasing_after_opt_out() {
    let mut fetcher = two_images();
    let gate = fetcher.gated(BLACK);
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, fetcher));
    let node = doc.insert_image(NodeSnapshot::image(BLACK), Some(BoxSize::new(8.0, 8.0)));
    let engine = engine(&doc);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.process(node).await }
    });
    while engine.token(node) != Some(1) {
        tokio::task::yield_now().await;
    }

    doc.set_attribute(node, "alt", "no-dither");
    engine.invalidate(node);
    assert_eq!(engine.process(node).await, ProcessOutcome::OptedOut);
    assert_eq!(engine.token(node), None);

    // Managed again under a token the stale job never held
    doc.set_attribute(node, "alt", "");
    doc.set_attribute(node, "src", WHITE);
    engine.invalidate(node);
    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);
    assert!(engine.token(node).unwrap() > 1);

    gate.add_permits(16);
    assert_eq!(first.await.unwrap(), ProcessOutcome::Superseded);
    assert_eq!(engine.state(node), Some(RenderState::Ready));
    assert!(surface_is(&doc, node, [255, 255, 255]));
}

#[tokio::test]
async fn test_override_off_releases_node_in_flight() {
    let mut fetcher = two_images();
    let gate = fetcher.gated(BLACK);
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, fetcher));
    let node = doc.insert_image(NodeSnapshot::image(BLACK), Some(BoxSize::new(8.0, 8.0)));
    let engine = engine(&doc);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.process(node).await }
    });
    while engine.token(node) != Some(1) {
        tokio::task::yield_now().await;
    }
    assert!(doc.node(node).unwrap().wrapped);

    doc.set_attribute(node, "data-runtime-dither", "off");
    engine.invalidate(node);
    assert_eq!(engine.process(node).await, ProcessOutcome::Released);

    gate.add_permits(16);
    assert_eq!(first.await.unwrap(), ProcessOutcome::Superseded);

    assert_eq!(engine.state(node), None);
    let released = doc.node(node).unwrap();
    assert!(!released.wrapped);
    assert!(released.surface.is_none());
    assert_eq!(released.presentation, None);
    assert_eq!(released.snapshot.attr("data-runtime-dither-mode"), None);
}

#[tokio::test]
async fn test_shared_fetcher_renders_on_spawned_task() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, SharedFetcher::new(two_images())));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    let engine = Arc::new(RenderEngine::new(doc.clone(), Duration::from_secs(5)));

    let outcome = tokio::spawn(async move { engine.process(node).await })
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Ready);
    assert!(doc.node(node).unwrap().surface.is_some());
}

#[tokio::test]
async fn test_gif_falls_back_with_animated_reason() {
    let url = "https://cdn.example/anim.gif";
    let doc = Arc::new(HeadlessDocument::new(
        ORIGIN,
        StubFetcher::default().with_image(url, tiny_gif()),
    ));
    let node = doc.insert_image(NodeSnapshot::image(url), Some(BoxSize::new(4.0, 4.0)));
    let engine = engine(&doc);

    assert_eq!(
        engine.process(node).await,
        ProcessOutcome::Fallback(FallbackReason::GifNotCanvasDithered)
    );
    let node = doc.node(node).unwrap();
    assert!(node.surface.is_none());
    assert_eq!(
        node.snapshot.attr("data-runtime-dither-mode"),
        Some("fallback-gif")
    );
    assert_eq!(
        node.snapshot.attr("data-runtime-dither-error"),
        Some("gif_not_canvas_dithered")
    );
}

#[tokio::test]
async fn test_missing_image_falls_back() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, StubFetcher::default()));
    let node = doc.insert_image(
        NodeSnapshot::image("https://cdn.example/gone.png"),
        Some(BoxSize::new(8.0, 8.0)),
    );
    let engine = engine(&doc);

    assert_eq!(
        engine.process(node).await,
        ProcessOutcome::Fallback(FallbackReason::DomImageLoadFailed)
    );
    assert_eq!(
        engine.state(node),
        Some(RenderState::Fallback(FallbackReason::DomImageLoadFailed))
    );
}

#[tokio::test]
async fn test_slow_anonymous_fetch_times_out() {
    let doc = Arc::new(HeadlessDocument::new(
        ORIGIN,
        two_images().with_delay(WHITE, Duration::from_millis(500)),
    ));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    doc.mark_loaded(node, 8, 8);
    let engine = RenderEngine::new(doc.clone(), Duration::from_millis(50));

    assert_eq!(
        engine.process(node).await,
        ProcessOutcome::Fallback(FallbackReason::CorsImageLoadFailed)
    );
}

#[tokio::test]
async fn test_undecodable_image_falls_back() {
    let url = "https://cdn.example/broken.png";
    let doc = Arc::new(HeadlessDocument::new(
        ORIGIN,
        StubFetcher::default().with_image(url, b"not an image".to_vec()),
    ));
    let node = doc.insert_image(NodeSnapshot::image(url), Some(BoxSize::new(8.0, 8.0)));
    doc.mark_loaded(node, 8, 8);
    let engine = engine(&doc);

    assert_eq!(
        engine.process(node).await,
        ProcessOutcome::Fallback(FallbackReason::DecodeFailed)
    );
}

#[tokio::test]
async fn test_alt_opt_out_tears_down_render() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    let engine = engine(&doc);
    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);

    doc.set_attribute(node, "alt", "Screenshot no-dither");
    engine.invalidate(node);
    assert_eq!(engine.process(node).await, ProcessOutcome::OptedOut);

    let node_state = doc.node(node).unwrap();
    assert!(!node_state.wrapped);
    assert!(node_state.surface.is_none());
    assert_eq!(node_state.presentation, Some(Presentation::OptOut));
    assert_eq!(engine.state(node), None);
}

#[tokio::test]
async fn test_hover_keyword_cleans_alt() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let mut snapshot = NodeSnapshot::image(WHITE);
    snapshot
        .attributes
        .insert("alt".into(), "Poster hover-original".into());
    let node = doc.insert_image(snapshot, Some(BoxSize::new(8.0, 8.0)));
    let engine = engine(&doc);

    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);
    let node = doc.node(node).unwrap();
    assert!(node.hover_original);
    assert_eq!(node.snapshot.attr("alt"), Some("Poster"));
}

#[tokio::test]
async fn test_stylesheet_palette_and_matrix_setting() {
    let url = "https://cdn.example/gradient.png";
    let doc = Arc::new(
        HeadlessDocument::new(
            ORIGIN,
            StubFetcher::default().with_image(url, gradient_png(32, 4)),
        )
        .with_stylesheet(":root { --clr-white: rgb(240, 230, 210); --clr-black-a10: rgb(30, 20, 10); }")
        .with_setting(BAYER_SIZE_SETTING, "4"),
    );
    let node = doc.insert_image(NodeSnapshot::image(url), Some(BoxSize::new(32.0, 4.0)));
    let engine = engine(&doc);
    assert_eq!(engine.matrix_size().get(), 4);

    assert_eq!(engine.process(node).await, ProcessOutcome::Ready);
    let surface = doc.node(node).unwrap().surface.unwrap();
    let mut seen = std::collections::HashSet::new();
    for px in surface.pixels.chunks_exact(4) {
        seen.insert([px[0], px[1], px[2]]);
    }
    assert_eq!(
        seen,
        [[240, 230, 210], [30, 20, 10]].into_iter().collect()
    );
}

#[tokio::test]
async fn test_computed_properties_when_stylesheet_lacks_palette() {
    let doc = Arc::new(
        HeadlessDocument::new(ORIGIN, two_images())
            .with_stylesheet("body { margin: 0 }")
            .with_computed("--clr-white", "#fafafa"),
    );
    let engine = engine(&doc);

    let palette = engine.palette().await;
    assert_eq!(palette.light.to_bytes(), [250, 250, 250]);
    assert_eq!(palette.dark.to_bytes(), [0, 0, 0]);
}

#[tokio::test]
async fn test_invalid_matrix_setting_uses_default() {
    let doc = Arc::new(
        HeadlessDocument::new(ORIGIN, two_images()).with_setting(BAYER_SIZE_SETTING, "5"),
    );
    assert_eq!(engine(&doc).matrix_size().get(), 16);
}

#[tokio::test]
async fn test_watcher_renders_inserts_and_refreshes_on_resize() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let events = doc.subscribe();
    let engine = engine(&doc);
    let handle = bootstrap(engine.clone(), doc.image_nodes(), events);

    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.state(node) != Some(RenderState::Ready) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node never became ready");
    assert_eq!(engine.token(node), Some(1));

    // Irrelevant attributes do not trigger work
    doc.set_attribute(node, "title", "hello");
    doc.resize(node, BoxSize::new(4.0, 2.0));
    doc.close_events();
    handle.await.unwrap();

    assert_eq!(engine.token(node), Some(2));
    assert_eq!(engine.state(node), Some(RenderState::Ready));
    let surface = doc.node(node).unwrap().surface.unwrap();
    assert_eq!((surface.width, surface.height), (4, 2));
}

#[tokio::test]
async fn test_watcher_rerenders_on_source_change() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(NodeSnapshot::image(BLACK), Some(BoxSize::new(8.0, 8.0)));
    let events = doc.subscribe();
    let engine = engine(&doc);
    let handle = bootstrap(engine.clone(), doc.image_nodes(), events);

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.state(node) != Some(RenderState::Ready) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node never became ready");
    assert_eq!(engine.token(node), Some(1));

    doc.set_attribute(node, "src", WHITE);
    doc.close_events();
    handle.await.unwrap();

    assert_eq!(engine.token(node), Some(2));
    assert_eq!(engine.state(node), Some(RenderState::Ready));
    assert!(surface_is(&doc, node, [255, 255, 255]));
}

#[tokio::test]
async fn test_watcher_releases_node_turned_off() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    let events = doc.subscribe();
    let engine = engine(&doc);
    let handle = bootstrap(engine.clone(), doc.image_nodes(), events);

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.state(node) != Some(RenderState::Ready) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node never became ready");

    doc.set_attribute(node, "data-runtime-dither", "off");
    doc.close_events();
    handle.await.unwrap();

    assert_eq!(engine.state(node), None);
    assert!(engine.ready_nodes().is_empty());
    assert!(!doc.node(node).unwrap().wrapped);
}

#[tokio::test]
async fn test_watcher_forgets_removed_nodes() {
    let doc = Arc::new(HeadlessDocument::new(ORIGIN, two_images()));
    let node = doc.insert_image(NodeSnapshot::image(WHITE), Some(BoxSize::new(8.0, 8.0)));
    let events = doc.subscribe();
    let engine = engine(&doc);
    let handle = bootstrap(engine.clone(), doc.image_nodes(), events);

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.state(node) != Some(RenderState::Ready) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node never became ready");

    doc.remove(node);
    doc.close_events();
    handle.await.unwrap();

    assert_eq!(engine.state(node), None);
    assert!(engine.ready_nodes().is_empty());
}
