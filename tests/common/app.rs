//! Test application factory for integration tests.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use duodither::models::{RunMode, SiteConfig};
use duodither::server::{build_router, create_app_state, AppState};
use duodither::services::BuildCache;

/// Test application with router and direct access to services
pub struct TestApp {
    router: axum::Router,
    pub cache: Arc<BuildCache>,
}

impl TestApp {
    /// Create a test application serving the given site
    pub fn new(config: SiteConfig) -> Self {
        Self::with_run_mode(config, RunMode::default())
    }

    pub fn with_run_mode(config: SiteConfig, run_mode: RunMode) -> Self {
        let state = create_app_state(config, run_mode).expect("Failed to create app state");
        Self::from_state(state)
    }

    /// Build around existing state, e.g. one with a custom fetcher
    pub fn from_state(state: AppState) -> Self {
        // Keep references for test assertions
        let cache = state.cache.clone();

        // Build router using shared server module (same as production)
        let router = build_router(state);

        Self { router, cache }
    }

    /// Make a GET request to the given path
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// Make a POST request with an HTML body
    pub async fn post_html(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> TestResponse {
        let mut builder = Request::post(path).header("Content-Type", "text/html");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Send a request to the router
    async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Test response with convenience methods
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse JSON response")
    }

    /// Get body as string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Get raw body bytes
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Check if response is a PNG image
    pub fn is_png(&self) -> bool {
        self.body.len() >= 8 && &self.body[0..8] == b"\x89PNG\r\n\x1a\n"
    }
}
