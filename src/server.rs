//! HTTP server setup and configuration.
//!
//! This module provides the router and application state used by both
//! the production server and integration tests.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api;
use crate::error::ApiError;
use crate::models::{RunMode, SiteConfig};
use crate::runtime::{HttpImageFetcher, SharedFetcher};
use crate::services::{BuildCache, DitherTransform};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SiteConfig>,
    pub transform: Arc<DitherTransform>,
    /// One cache for the lifetime of the server process
    pub cache: Arc<BuildCache>,
    pub fetcher: SharedFetcher,
}

/// Create application state with an HTTP image fetcher.
pub fn create_app_state(config: SiteConfig, run_mode: RunMode) -> anyhow::Result<AppState> {
    let timeout = Duration::from_secs(config.runtime.fetch_timeout_secs);
    let fetcher = HttpImageFetcher::new(timeout)
        .map_err(|e| anyhow::anyhow!("Failed to create image fetcher: {e}"))?;
    Ok(create_app_state_with_fetcher(
        config,
        run_mode,
        SharedFetcher::new(fetcher),
    ))
}

/// Create application state around a specific image source.
pub fn create_app_state_with_fetcher(
    config: SiteConfig,
    run_mode: RunMode,
    fetcher: SharedFetcher,
) -> AppState {
    let transform = Arc::new(DitherTransform::new(config.clone(), run_mode));
    AppState {
        config: Arc::new(config),
        transform,
        cache: Arc::new(BuildCache::new()),
        fetcher,
    }
}

/// Build the router with all endpoints and middleware.
///
/// Anything not matched by an API route is served from the output tree.
pub fn build_router(state: AppState) -> Router {
    let site = ServeDir::new(state.config.output_dir());

    Router::new()
        .route("/api/transform", post(handle_transform))
        .route("/api/live", get(handle_live))
        // Health check
        .route("/health", get(|| async { "OK" }))
        .fallback_service(site)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// Wrapper handlers to extract state components for the underlying API handlers

async fn handle_transform(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    api::handle_transform(State(state.transform), State(state.cache), headers, body).await
}

async fn handle_live(
    State(state): State<AppState>,
    query: Query<api::LiveQuery>,
) -> Result<Response, ApiError> {
    api::handle_live(State(state.config), State(state.fetcher), query).await
}
