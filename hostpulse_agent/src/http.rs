//! HTTP surface: one GET route answering with the current snapshot as JSON.

use std::panic::AssertUnwindSafe;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::FutureExt;
use serde::Serialize;
use tracing::error;

use crate::error::{panic_message, FatalError, FatalKind};
use crate::state::AppState;

/// Sent when even the error body cannot be encoded.
pub const FALLBACK_BODY: &str = r#"{"error":true,"message":"Unexpected error"}"#;

pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(state)
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let collector = state.collector.as_ref();
    let collected = match AssertUnwindSafe(collector.collect()).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(FatalError::new(FatalKind::Panic(panic_message(
            payload.as_ref(),
        )))),
    };
    let encoded = collected
        .and_then(|snap| serde_json::to_vec(&snap).map_err(|e| FatalError::new(e)));

    match encoded {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => {
            error!(error = %err, file = err.file(), line = err.line(), "metrics request failed");
            let time = collector.wall_time().unwrap_or_default();
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body(&err, collector.os(), &time),
            )
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    os: &'a str,
    time: &'a str,
}

/// JSON body for a failed request, or [`FALLBACK_BODY`] if that cannot be
/// encoded.
pub fn error_body(err: &FatalError, os: &str, time: &str) -> Vec<u8> {
    let body = ErrorBody {
        error: true,
        message: err.to_string(),
        file: Some(err.file()),
        line: Some(err.line()),
        os,
        time,
    };
    serde_json::to_vec(&body).unwrap_or_else(|_| FALLBACK_BODY.as_bytes().to_vec())
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
        body,
    )
        .into_response()
}
