use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;
use crate::models::SiteConfig;
use crate::rendering::encode_rgba_png;
use crate::runtime::eligibility::OVERRIDE_ATTR;
use crate::runtime::{
    BoxSize, HeadlessDocument, NodeSnapshot, ProcessOutcome, RenderEngine,
    SharedFetcher, BAYER_SIZE_SETTING,
};

// Upper bound on a requested surface, in CSS pixels
const MAX_LIVE_DIMENSION: f64 = 4000.0;

/// Query parameters for the live endpoint
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub src: String,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    /// Matrix size; invalid values fall back to the default
    #[serde(default)]
    pub bayer: Option<String>,
}

/// Render a remote image the way a page would show it at runtime
///
/// Returns the dithered PNG with `X-Dither-State: ready`, or `422` with the
/// fallback reason when the page would keep showing the original.
pub async fn handle_live(
    State(config): State<Arc<SiteConfig>>,
    State(fetcher): State<SharedFetcher>,
    Query(query): Query<LiveQuery>,
) -> Result<Response, ApiError> {
    let src = resolve_src(&config.site_origin, &query.src)?;
    let layout = layout_box(query.width, query.height)?;

    let bayer = query
        .bayer
        .clone()
        .unwrap_or_else(|| config.bayer_size.to_string());
    let mut document = HeadlessDocument::new(config.site_origin.clone(), fetcher)
        .with_setting(BAYER_SIZE_SETTING, &bayer);
    if let Ok(css) = tokio::fs::read_to_string(config.stylesheet_path()).await {
        document = document.with_stylesheet(css);
    }
    let document = Arc::new(document);

    let mut snapshot = NodeSnapshot::image(src.as_str());
    snapshot.attributes.insert(OVERRIDE_ATTR.into(), "on".into());
    let node = document.insert_image(snapshot, layout);

    let engine = RenderEngine::new(
        document.clone(),
        Duration::from_secs(config.runtime.fetch_timeout_secs),
    );

    match engine.process(node).await {
        ProcessOutcome::Ready => {
            let surface = document
                .node(node)
                .and_then(|n| n.surface)
                .ok_or_else(|| ApiError::Internal("rendered surface missing".into()))?;
            let png = encode_rgba_png(surface.width, surface.height, &surface.pixels)?;

            tracing::info!(
                src = %src,
                width = surface.width,
                height = surface.height,
                matrix_size = %engine.matrix_size(),
                "Live render served"
            );

            Ok((
                [
                    (header::CONTENT_TYPE, "image/png"),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                [("X-Dither-State", "ready")],
                png,
            )
                .into_response())
        }
        ProcessOutcome::Fallback(reason) => {
            tracing::info!(src = %src, reason = %reason, "Live render fell back");
            Ok(fallback_response(reason.code()))
        }
        other => Err(ApiError::Internal(format!(
            "unexpected render outcome {other:?}"
        ))),
    }
}

fn fallback_response(reason: &str) -> Response {
    let status = StatusCode::UNPROCESSABLE_ENTITY;
    (
        status,
        [("X-Dither-State", "fallback")],
        Json(json!({
            "status": status.as_u16(),
            "state": "fallback",
            "reason": reason,
        })),
    )
        .into_response()
}

/// Absolute http(s) URL for `src`, relative sources resolved against the site
fn resolve_src(origin: &str, src: &str) -> Result<Url, ApiError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ApiError::InvalidQuery("src must not be empty".into()));
    }
    let base = Url::parse(origin)
        .map_err(|e| ApiError::Internal(format!("invalid site_origin {origin}: {e}")))?;
    let url = base
        .join(src)
        .map_err(|e| ApiError::InvalidQuery(format!("src: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::InvalidQuery(format!("unsupported scheme {other}"))),
    }
}

fn layout_box(width: Option<f64>, height: Option<f64>) -> Result<Option<BoxSize>, ApiError> {
    for (name, value) in [("width", width), ("height", height)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 || v > MAX_LIVE_DIMENSION {
                return Err(ApiError::InvalidQuery(format!(
                    "{name} must be between 0 and {MAX_LIVE_DIMENSION}"
                )));
            }
        }
    }
    Ok((width.is_some() || height.is_some())
        .then(|| BoxSize::new(width.unwrap_or(0.0), height.unwrap_or(0.0))))
}
