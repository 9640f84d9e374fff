pub mod eligibility;
pub mod engine;
pub mod environment;
pub mod headless;
pub mod watcher;

pub use engine::{target_size, ProcessOutcome, RenderEngine, RenderState, BAYER_SIZE_SETTING};
pub use environment::{
    BoxSize, FallbackReason, Measurements, NodeId, NodeSnapshot, Presentation, RenderEnvironment,
    RenderFailure, RgbaBuffer,
};
pub use headless::{
    FetchError, HeadlessDocument, HeadlessNode, HttpImageFetcher, ImageFetcher, LoadState,
    SharedFetcher,
};
pub use watcher::{bootstrap, DocumentEvent, MutationWatcher, REFRESH_DEBOUNCE};
