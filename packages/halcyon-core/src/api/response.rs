//! Response helpers for HTTP handlers.
//!
//! Success responses carry their payload directly. Error responses share
//! the JSON shape produced by [`HubError`](crate::error::HubError), so
//! clients see one error format regardless of which path built it.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// Returns a 200 response with the given JSON payload.
pub fn api_success(payload: Value) -> Response {
    Json(payload).into_response()
}

/// Returns a minimal `{"ok": true}` acknowledgement.
pub fn api_ok() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// Returns an error response with the standard error body.
pub fn api_error(status: StatusCode, code: &'static str, message: impl Display) -> Response {
    let body = json!({
        "error": code,
        "message": message.to_string(),
        "status": status.as_u16(),
    });
    (status, Json(body)).into_response()
}
