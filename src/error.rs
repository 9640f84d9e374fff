use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid header {0}: {1}")]
    InvalidHeader(&'static str, String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of one build-time image reference.
///
/// None of these abort a page: the transform logs them and leaves the
/// reference (or asset) as it was.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Decode error for {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    #[error("PNG encode error: {0}")]
    Encode(String),

    #[error("Dither error: {0}")]
    Dither(#[from] bayer_dither::DitherError),

    #[error("Render task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::MissingHeader(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::InvalidHeader(_, _) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Pipeline(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "status": status.as_u16(),
            "error": message,
        }));

        (status, body).into_response()
    }
}
