//! Request decomposition for analysis.
//!
//! # Responsibilities
//! - Decode query strings and bodies (JSON, form-urlencoded, text)
//! - Collect header values and the user agent
//! - Build the `RequestContext` recorded with events and audit entries
//!
//! # Design Decisions
//! - Undecodable bodies are inspected as raw text rather than skipped
//! - Binary bodies (invalid UTF-8) are not inspected

use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::request::Parts;
use serde_json::{Map, Value};

use crate::security::detector::InspectedRequest;
use crate::security::types::RequestContext;

/// Build the detector's view of a buffered request.
pub fn inspect(parts: &Parts, body: &[u8]) -> InspectedRequest {
    let query = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    InspectedRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query,
        body: decode_body(content_type(parts), body),
        headers,
        user_agent: user_agent(parts),
    }
}

/// Context recorded alongside events and audit entries.
pub fn request_context(parts: &Parts, ip: &str) -> RequestContext {
    RequestContext {
        ip: ip.to_string(),
        user_agent: user_agent(parts),
        method: Some(parts.method.as_str().to_string()),
        url: Some(
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
        ),
    }
}

/// Username attempted on a login request (`email`, then `username`).
pub fn login_username(body: Option<&Value>) -> Option<String> {
    let body = body?.as_object()?;
    ["email", "username"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn user_agent(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn content_type(parts: &Parts) -> &str {
    parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn decode_body(content_type: &str, body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime == "application/x-www-form-urlencoded" {
        let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .into_owned()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Some(Value::Object(fields));
    }
    if mime.is_empty() || mime == "application/json" || mime.ends_with("+json") {
        if let Ok(value) = serde_json::from_slice(body) {
            return Some(value);
        }
    }
    std::str::from_utf8(body)
        .ok()
        .map(|text| Value::String(text.to_string()))
}
