//! Feeds document changes into the render engine.

use super::engine::RenderEngine;
use super::environment::{NodeId, RenderEnvironment};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Delay between the last load/resize event and the refresh of ready nodes
pub const REFRESH_DEBOUNCE: Duration = Duration::from_millis(120);

/// Attributes whose changes can alter eligibility or the render
pub const RELEVANT_ATTRIBUTES: [&str; 6] = [
    "src",
    "srcset",
    "alt",
    "data-runtime-dither",
    "width",
    "height",
];

/// Something that happened in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Image nodes found in a newly inserted subtree
    Inserted(Vec<NodeId>),
    AttributeChanged { node: NodeId, attribute: String },
    Removed(NodeId),
    /// A single image finished loading
    Loaded(NodeId),
    /// The whole page finished loading
    PageLoaded,
    Resized,
}

pub struct MutationWatcher<E: RenderEnvironment> {
    engine: Arc<RenderEngine<E>>,
    tasks: JoinSet<()>,
    refresh_at: Option<Instant>,
}

impl<E: RenderEnvironment> MutationWatcher<E> {
    pub fn new(engine: Arc<RenderEngine<E>>) -> Self {
        Self {
            engine,
            tasks: JoinSet::new(),
            refresh_at: None,
        }
    }

    /// Process events until the sender side closes.
    ///
    /// A pending refresh still fires after the channel closes, and the call
    /// returns once every spawned render has finished.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<DocumentEvent>) {
        loop {
            let deadline = self.refresh_at;
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.refresh_at = None;
                    self.refresh_ready();
                }
            }
            while self.tasks.try_join_next().is_some() {}
        }

        if let Some(deadline) = self.refresh_at.take() {
            tokio::time::sleep_until(deadline).await;
            self.refresh_ready();
        }
        while self.tasks.join_next().await.is_some() {}
    }

    fn handle(&mut self, event: DocumentEvent) {
        match event {
            DocumentEvent::Inserted(nodes) => {
                for node in nodes {
                    self.spawn_process(node);
                }
            }
            DocumentEvent::AttributeChanged { node, attribute } => {
                if RELEVANT_ATTRIBUTES.contains(&attribute.as_str()) {
                    self.engine.invalidate(node);
                    self.spawn_process(node);
                }
            }
            DocumentEvent::Loaded(node) => self.spawn_process(node),
            DocumentEvent::Removed(node) => self.engine.forget(node),
            DocumentEvent::PageLoaded | DocumentEvent::Resized => {
                self.refresh_at = Some(Instant::now() + REFRESH_DEBOUNCE);
            }
        }
    }

    /// Re-render every ready node under a fresh token
    fn refresh_ready(&mut self) {
        let nodes = self.engine.ready_nodes();
        tracing::debug!(count = nodes.len(), "Refreshing live renders");
        for node in nodes {
            self.engine.invalidate(node);
            self.spawn_process(node);
        }
    }

    fn spawn_process(&mut self, node: NodeId) {
        let engine = self.engine.clone();
        self.tasks.spawn(async move {
            engine.process(node).await;
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Process every image currently in the document, then watch for changes
pub fn bootstrap<E: RenderEnvironment>(
    engine: Arc<RenderEngine<E>>,
    nodes: Vec<NodeId>,
    events: mpsc::UnboundedReceiver<DocumentEvent>,
) -> JoinHandle<()> {
    let mut watcher = MutationWatcher::new(engine);
    watcher.handle(DocumentEvent::Inserted(nodes));
    tokio::spawn(watcher.run(events))
}
