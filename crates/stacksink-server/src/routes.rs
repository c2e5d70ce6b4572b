//! Route handlers and the raw-payload recorder.
//!
//! Every known POST is recorded to the raw event log before its typed
//! handler runs; handler work is submitted to the serialization queue and
//! the connection blocks on completion. The node treats 500 as "retry
//! later", which is the back-pressure this layer relies on.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use stacksink_core::msg::{
    CoreNodeAttachmentMessage, CoreNodeBlockMessage, CoreNodeBurnBlockMessage,
    CoreNodeDropMempoolTxMessage, CoreNodeMicroblockMessage,
};
use stacksink_core::IngestError;

use crate::{AppState, MAX_BODY_BYTES};

/// Paths the recorder persists; anything else 404s without a log entry.
const EVENT_PATHS: [&str; 6] = [
    "/new_block",
    "/new_burn_block",
    "/new_mempool_tx",
    "/drop_mempool_tx",
    "/attachments/new",
    "/new_microblocks",
];

/// Errors above this size are logged with a placeholder instead of the
/// offending payload.
const MAX_LOGGED_PAYLOAD: usize = 10 * 1024 * 1024;

fn ok_response() -> Response {
    Json(json!({"result": "ok"})).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn payload_for_log(body: &[u8]) -> String {
    if body.len() > MAX_LOGGED_PAYLOAD {
        format!("<payload of {} bytes omitted>", body.len())
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

/// `GET /`
pub async fn status() -> Response {
    Json(json!({"status": "ready", "msg": "stacksink event server"})).into_response()
}

pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// Persist every known POST verbatim before its typed handler runs.
///
/// The body is re-serialized compactly from the parsed JSON so replay posts
/// byte-identical payloads regardless of the node's original whitespace.
pub async fn record_raw_event(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::POST || !EVENT_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(%path, %e, "failed to buffer request body");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            error!(%path, %e, payload = %payload_for_log(&bytes), "malformed event body");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };
    let compact = value.to_string();

    if let Err(e) = state.store.store_raw_event_request(&path, &compact).await {
        error!(%path, %e, "raw event append failed; aborting request");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    next.run(Request::from_parts(parts, Body::from(compact))).await
}

/// Decode failures get a 500, not a 4xx: the node's retry loop is the
/// recovery path for every failure class.
fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error!(%e, payload = %payload_for_log(body), "event body failed schema decode");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
    })
}

fn respond(result: Result<(), IngestError>, body: &Bytes) -> Response {
    match result {
        Ok(()) => ok_response(),
        Err(err) => {
            error!(%err, payload = %payload_for_log(body), "event handler failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

pub async fn new_block(State(state): State<AppState>, body: Bytes) -> Response {
    let msg: CoreNodeBlockMessage = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_block(msg).await })
        .await;
    respond(result, &body)
}

pub async fn new_microblocks(State(state): State<AppState>, body: Bytes) -> Response {
    let msg: CoreNodeMicroblockMessage = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_microblocks(msg).await })
        .await;
    respond(result, &body)
}

pub async fn new_burn_block(State(state): State<AppState>, body: Bytes) -> Response {
    let msg: CoreNodeBurnBlockMessage = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_burn_block(msg).await })
        .await;
    respond(result, &body)
}

pub async fn new_mempool_tx(State(state): State<AppState>, body: Bytes) -> Response {
    let raw_txs: Vec<String> = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_mempool_txs(raw_txs).await })
        .await;
    respond(result, &body)
}

pub async fn drop_mempool_tx(State(state): State<AppState>, body: Bytes) -> Response {
    let msg: CoreNodeDropMempoolTxMessage = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_drop_mempool_txs(msg).await })
        .await;
    respond(result, &body)
}

pub async fn attachments_new(State(state): State<AppState>, body: Bytes) -> Response {
    let msgs: Vec<CoreNodeAttachmentMessage> = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    let ingester = Arc::clone(&state.ingester);
    let result = state
        .queue
        .submit(async move { ingester.handle_attachments(msgs).await })
        .await;
    respond(result, &body)
}
