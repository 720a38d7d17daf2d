//! API handlers for Poemvy.
//!
//! Handlers speak the client envelope: success bodies carry
//! `"success": true`, failures are `{"error": "<message>"}` with the
//! status code carrying the category.

pub mod account;
pub mod auth;
pub mod health;
pub mod root;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Build the uniform failure envelope.
pub fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
