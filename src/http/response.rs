//! Responses produced by the guard itself.
//!
//! Rejections carry a fixed body and never reveal which rule fired.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// `403 {"error": "Access denied"}`.
pub fn access_denied() -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": "Access denied" }))).into_response()
}

pub fn payload_too_large() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({ "error": "Payload too large" })),
    )
        .into_response()
}

pub fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "Upstream request failed" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_access_denied_body_is_generic() {
        let response = access_denied();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Access denied" }));
    }
}
