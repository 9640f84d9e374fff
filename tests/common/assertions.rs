//! Assertion helpers for tests.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use super::app::TestResponse;

/// Assert response has expected status code
pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    assert_eq!(
        response.status, expected,
        "Expected status {}, got {}. Body: {}",
        expected,
        response.status,
        response.text()
    );
}

/// Assert response is OK (200)
pub fn assert_ok(response: &TestResponse) {
    assert_status(response, StatusCode::OK);
}

/// Assert response is a valid PNG image
pub fn assert_png(response: &TestResponse) {
    assert_ok(response);
    assert!(
        response.is_png(),
        "Expected PNG image, got {} bytes starting with {:?}",
        response.body.len(),
        &response.body[..8.min(response.body.len())]
    );

    let content_type = response
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok());
    assert_eq!(
        content_type,
        Some("image/png"),
        "Expected Content-Type: image/png"
    );
}

/// Assert JSON response has expected status field
pub fn assert_json_status(response: &TestResponse, expected_status: u16) {
    let json: serde_json::Value = response.json();
    assert_eq!(
        json["status"].as_u64(),
        Some(expected_status as u64),
        "Expected JSON status {}, got {:?}. Full response: {}",
        expected_status,
        json["status"],
        serde_json::to_string_pretty(&json).unwrap()
    );
}

/// Assert a live render fell back for `reason`
pub fn assert_fallback(response: &TestResponse, reason: &str) {
    assert_status(response, StatusCode::UNPROCESSABLE_ENTITY);
    let json: serde_json::Value = response.json();
    assert_eq!(json["state"], "fallback");
    assert_eq!(json["reason"], reason);
}

/// Every pixel of decoded PNG bytes is one of the two palette colors
pub fn assert_two_tone(png: &[u8], light: [u8; 3], dark: [u8; 3]) {
    let image = image::load_from_memory(png)
        .expect("Failed to decode PNG")
        .to_rgba8();
    for pixel in image.pixels() {
        let rgb = [pixel[0], pixel[1], pixel[2]];
        assert!(
            rgb == light || rgb == dark || pixel[3] == 0,
            "Unexpected pixel {pixel:?}"
        );
    }
}
