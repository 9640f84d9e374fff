use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use std::sync::Arc;

use super::headers::HeaderMapExt;
use crate::error::ApiError;
use crate::models::PageContext;
use crate::services::{BuildCache, DitherTransform};

pub const OUTPUT_PATH_HEADER: &str = "X-Output-Path";
pub const INPUT_PATH_HEADER: &str = "X-Input-Path";
pub const PAGE_DATA_HEADER: &str = "X-Page-Data";

/// Transform one rendered page
///
/// The body is the page markup; the response is the rewritten markup.
/// Pages whose output path does not end in `.html` come back unchanged.
pub async fn handle_transform(
    State(transform): State<Arc<DitherTransform>>,
    State(cache): State<Arc<BuildCache>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let output_path = PathBuf::from(headers.require_str(OUTPUT_PATH_HEADER)?);

    let page = PageContext {
        ctx: None,
        data: headers.get_json_object(PAGE_DATA_HEADER)?,
        input_path: headers.get_str(INPUT_PATH_HEADER).map(PathBuf::from),
    };

    tracing::debug!(
        output = %output_path.display(),
        bytes = body.len(),
        "Transform request received"
    );

    let html = transform
        .transform(&cache, &body, &output_path, &page)
        .await;

    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
}
