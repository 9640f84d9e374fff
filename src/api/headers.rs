//! Header parsing for the transform endpoint.

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Extension trait for convenient header parsing.
pub trait HeaderMapExt {
    /// Get a header value as a string, or return an error if missing.
    fn require_str(&self, name: &'static str) -> Result<&str, ApiError>;

    /// Get a header value as a string, returning None if missing or blank.
    fn get_str(&self, name: &str) -> Option<&str>;

    /// Parse a header holding a JSON object.
    fn get_json_object(&self, name: &'static str) -> Result<Option<Map<String, Value>>, ApiError>;
}

impl HeaderMapExt for HeaderMap {
    fn require_str(&self, name: &'static str) -> Result<&str, ApiError> {
        self.get_str(name).ok_or(ApiError::MissingHeader(name))
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn get_json_object(&self, name: &'static str) -> Result<Option<Map<String, Value>>, ApiError> {
        let Some(raw) = self.get_str(name) else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(ApiError::InvalidHeader(name, "expected a JSON object".into())),
            Err(e) => Err(ApiError::InvalidHeader(name, e.to_string())),
        }
    }
}
