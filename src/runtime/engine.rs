//! Live render state machine: one job per managed image node.
//!
//! Every render request takes a fresh run token. Work continues across
//! suspension points without being cancelled, but only the job holding the
//! node's current token may change what the node shows. Tokens keep
//! increasing for a node even after its job is discarded.

use super::eligibility::{is_eligible, is_gif, NodeSignals};
use super::environment::{
    FallbackReason, Measurements, NodeId, Presentation, RenderEnvironment, RenderFailure,
};
use crate::services::palette_resolver::{palette_from_computed, palette_from_stylesheet};
use bayer_dither::{dither_rgba, MatrixSize, Palette};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Document setting carrying the matrix size
pub const BAYER_SIZE_SETTING: &str = "bayer-size";

/// Lifecycle state of a managed node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Pending,
    Ready,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Copy)]
struct RenderJob {
    token: u64,
    /// `None` once the job was discarded; the token is kept
    state: Option<RenderState>,
    /// Processed under the current token
    done: bool,
    hover_original: bool,
}

/// Result of one `process` call, mostly for callers that log or test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not managed, or already processed under its current token
    Skipped,
    /// Alt text opted the node out; any wrapper was removed
    OptedOut,
    /// The node is no longer eligible; its render was discarded
    Released,
    /// A newer token took over while this job was suspended
    Superseded,
    Ready,
    Fallback(FallbackReason),
}

pub struct RenderEngine<E: RenderEnvironment> {
    env: Arc<E>,
    jobs: Mutex<HashMap<NodeId, RenderJob>>,
    palette: OnceCell<Palette>,
    matrix_size: MatrixSize,
    fetch_timeout: Duration,
}

impl<E: RenderEnvironment> RenderEngine<E> {
    pub fn new(env: Arc<E>, fetch_timeout: Duration) -> Self {
        let matrix_size = MatrixSize::normalize(
            env.document_setting(BAYER_SIZE_SETTING)
                .as_deref()
                .unwrap_or_default(),
            MatrixSize::DEFAULT.get() as u32,
        );
        tracing::debug!(matrix_size = %matrix_size, "Runtime engine ready");

        Self {
            env,
            jobs: Mutex::new(HashMap::new()),
            palette: OnceCell::new(),
            matrix_size,
            fetch_timeout,
        }
    }

    pub fn environment(&self) -> &Arc<E> {
        &self.env
    }

    pub fn matrix_size(&self) -> MatrixSize {
        self.matrix_size
    }

    pub fn state(&self, node: NodeId) -> Option<RenderState> {
        self.jobs().get(&node).and_then(|job| job.state)
    }

    /// Current token of a managed node
    pub fn token(&self, node: NodeId) -> Option<u64> {
        self.jobs()
            .get(&node)
            .filter(|job| job.state.is_some())
            .map(|job| job.token)
    }

    /// Nodes currently showing a live render
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .jobs()
            .iter()
            .filter(|(_, job)| job.state == Some(RenderState::Ready))
            .map(|(node, _)| *node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Allow the node to be processed again under a new token
    pub fn invalidate(&self, node: NodeId) {
        if let Some(job) = self.jobs().get_mut(&node) {
            job.done = false;
        }
    }

    /// Discard the job of a node that left the document
    pub fn forget(&self, node: NodeId) {
        retire(&mut self.jobs(), node);
    }

    /// Evaluate a node and, when eligible, render it under a fresh token
    pub async fn process(&self, node: NodeId) -> ProcessOutcome {
        let Some(snapshot) = self.env.snapshot(node) else {
            self.forget(node);
            return ProcessOutcome::Skipped;
        };
        let signals = NodeSignals::from_snapshot(&snapshot);

        if signals.exclude_from_dithering {
            retire(&mut self.jobs(), node);
            self.env.teardown_wrapper(node);
            self.env.set_presentation(node, Presentation::OptOut, false);
            tracing::debug!(node, "Node opted out through alt text");
            return ProcessOutcome::OptedOut;
        }

        let origin = self.env.page_origin();
        let token = match self.begin(node, &snapshot, &signals, &origin) {
            Begin::Started(token) => token,
            Begin::Released => {
                tracing::debug!(node, "Node no longer eligible, render discarded");
                return ProcessOutcome::Released;
            }
            Begin::Skipped => return ProcessOutcome::Skipped,
        };

        let src = snapshot.source().unwrap_or_default().to_string();
        match self.render(node, token, &src, &origin).await {
            Ok(()) => {
                if self.commit(node, token, RenderState::Ready) {
                    tracing::debug!(node, token, %src, "Live render ready");
                    ProcessOutcome::Ready
                } else {
                    ProcessOutcome::Superseded
                }
            }
            Err(None) => ProcessOutcome::Superseded,
            Err(Some(failure)) => {
                if self.commit(node, token, RenderState::Fallback(failure.reason)) {
                    tracing::debug!(node, token, %src, %failure, "Live render fell back");
                    ProcessOutcome::Fallback(failure.reason)
                } else {
                    ProcessOutcome::Superseded
                }
            }
        }
    }

    /// Issue a token and show the pending state.
    ///
    /// A managed node that stopped being eligible loses its job and wrapper.
    fn begin(
        &self,
        node: NodeId,
        snapshot: &super::environment::NodeSnapshot,
        signals: &NodeSignals,
        origin: &str,
    ) -> Begin {
        let mut jobs = self.jobs();
        if !is_eligible(snapshot, signals, origin) {
            if retire(&mut jobs, node) {
                self.env.teardown_wrapper(node);
                self.env.clear_presentation(node);
                return Begin::Released;
            }
            return Begin::Skipped;
        }
        if jobs.get(&node).is_some_and(|job| job.done) {
            return Begin::Skipped;
        }

        let job = jobs.entry(node).or_insert(RenderJob {
            token: 0,
            state: None,
            done: false,
            hover_original: false,
        });
        job.token += 1;
        job.done = true;
        job.state = Some(RenderState::Pending);
        job.hover_original = signals.prefer_original_on_hover;
        let token = job.token;

        self.env.ensure_wrapper(node);
        if let Some(alt) = &signals.cleaned_alt {
            self.env.set_alt(node, alt.as_deref());
        }
        self.env
            .set_presentation(node, Presentation::Pending, signals.prefer_original_on_hover);
        Begin::Started(token)
    }

    /// `Err(None)` means superseded and must leave no trace
    async fn render(
        &self,
        node: NodeId,
        token: u64,
        src: &str,
        origin: &str,
    ) -> Result<(), Option<RenderFailure>> {
        self.env.wait_for_load(node).await.map_err(Some)?;
        self.still_current(node, token)?;

        if is_gif(src, origin) {
            return Err(Some(RenderFailure::new(
                FallbackReason::GifNotCanvasDithered,
                "animated images are shown as is",
            )));
        }

        let palette = self.palette().await;
        self.still_current(node, token)?;

        let (width, height) = target_size(&self.env.measure(node)).map_err(Some)?;

        let image = match tokio::time::timeout(self.fetch_timeout, self.env.load_image(src)).await {
            Ok(result) => result.map_err(Some)?,
            Err(_) => {
                return Err(Some(RenderFailure::new(
                    FallbackReason::CorsImageLoadFailed,
                    format!("fetch timed out after {}s", self.fetch_timeout.as_secs()),
                )))
            }
        };
        self.still_current(node, token)?;

        let env = self.env.clone();
        let matrix_size = self.matrix_size.get() as u32;
        let buffer = tokio::task::spawn_blocking(move || {
            let mut buffer = env.rasterize(&image, width, height)?;
            dither_rgba(
                &mut buffer.pixels,
                buffer.width as usize,
                buffer.height as usize,
                matrix_size,
                &palette,
            )
            .map_err(|e| RenderFailure::new(FallbackReason::RuntimeDitherFailed, e.to_string()))?;
            Ok::<_, RenderFailure>(buffer)
        })
        .await
        .map_err(|e| Some(RenderFailure::new(FallbackReason::RuntimeDitherFailed, e.to_string())))?
        .map_err(Some)?;

        // Drawing happens under the job lock so a newer token cannot
        // interleave with it
        let jobs = self.jobs();
        if !holds_token(&jobs, node, token) {
            return Err(None);
        }
        self.env.composite(node, &buffer).map_err(Some)
    }

    fn still_current(&self, node: NodeId, token: u64) -> Result<(), Option<RenderFailure>> {
        if holds_token(&self.jobs(), node, token) {
            Ok(())
        } else {
            Err(None)
        }
    }

    /// Record the final state if `token` is still current
    fn commit(&self, node: NodeId, token: u64, state: RenderState) -> bool {
        let mut jobs = self.jobs();
        let Some(job) = jobs
            .get_mut(&node)
            .filter(|job| job.token == token && job.state.is_some())
        else {
            return false;
        };
        job.state = Some(state);
        let presentation = match state {
            RenderState::Pending => Presentation::Pending,
            RenderState::Ready => Presentation::Ready,
            RenderState::Fallback(reason) => Presentation::Fallback(reason),
        };
        self.env.set_presentation(node, presentation, job.hover_original);
        true
    }

    /// Theme palette, resolved once per engine: stylesheet text first,
    /// then computed custom properties, per-color defaults last
    pub async fn palette(&self) -> Palette {
        *self
            .palette
            .get_or_init(|| async {
                if let Some(css) = self.env.stylesheet_text().await {
                    if let Some(palette) = palette_from_stylesheet(&css) {
                        return palette;
                    }
                }
                palette_from_computed(|name| self.env.computed_custom_property(name))
            })
            .await
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<NodeId, RenderJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Begin {
    Started(u64),
    Released,
    Skipped,
}

fn holds_token(jobs: &HashMap<NodeId, RenderJob>, node: NodeId, token: u64) -> bool {
    jobs.get(&node)
        .is_some_and(|job| job.token == token && job.state.is_some())
}

/// Discard a node's job but keep its token, bumped past any job in flight.
/// Returns whether the node was managed.
fn retire(jobs: &mut HashMap<NodeId, RenderJob>, node: NodeId) -> bool {
    let Some(job) = jobs.get_mut(&node) else {
        return false;
    };
    let managed = job.state.is_some();
    job.token += 1;
    job.state = None;
    job.done = false;
    job.hover_original = false;
    managed
}

/// Pick the render size: node box, then wrapper box, then natural size;
/// height falls back to the natural aspect ratio.
pub fn target_size(m: &Measurements) -> Result<(u32, u32), RenderFailure> {
    let missing = |detail: &str| RenderFailure::new(FallbackReason::MissingDimensions, detail);

    let (natural_w, natural_h) = m.natural.unwrap_or((0, 0));
    if natural_w == 0 || natural_h == 0 {
        return Err(missing("image has no natural size"));
    }

    let positive = |v: f64| (v.is_finite() && v > 0.0).then_some(v);
    let width = m
        .node
        .and_then(|b| positive(b.width))
        .or_else(|| m.wrapper.and_then(|b| positive(b.width)))
        .unwrap_or(natural_w as f64)
        .round();
    if width < 1.0 {
        return Err(missing("zero render width"));
    }

    let height = m
        .node
        .and_then(|b| positive(b.height))
        .or_else(|| m.wrapper.and_then(|b| positive(b.height)))
        .unwrap_or(natural_h as f64 / natural_w as f64 * width)
        .round()
        .max(1.0);

    Ok((width as u32, height as u32))
}
