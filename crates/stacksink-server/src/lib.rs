//! stacksink-server — the HTTP event endpoint.
//!
//! A small set of POST routes bound to the core handlers, fronted by a
//! raw-payload recorder that persists every inbound request verbatim before
//! the typed handler runs, plus TSV export/replay of that raw log.
//!
//! The HTTP layer may decode any number of requests concurrently; every
//! state-changing handler runs through the concurrency-1 serialization
//! queue, so store commits follow request arrival order.

pub mod replay;
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use stacksink_core::{IngestConfig, IngestError, IngestStore, Ingester, SerialQueue};

/// Request body cap. The initial chain genesis payload is ~80 MB.
pub const MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

/// Queued messages waiting on the single writer before senders block.
const QUEUE_DEPTH: usize = 16;

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IngestStore>,
    pub ingester: Arc<Ingester>,
    pub queue: SerialQueue,
}

impl AppState {
    pub fn new(store: Arc<dyn IngestStore>, chain_id: u32) -> Self {
        Self {
            ingester: Arc::new(Ingester::new(Arc::clone(&store), chain_id)),
            store,
            queue: SerialQueue::new(QUEUE_DEPTH),
        }
    }
}

/// Build the event endpoint router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::status))
        .route("/new_block", post(routes::new_block))
        .route("/new_burn_block", post(routes::new_burn_block))
        .route("/new_mempool_tx", post(routes::new_mempool_tx))
        .route("/drop_mempool_tx", post(routes::drop_mempool_tx))
        .route("/attachments/new", post(routes::attachments_new))
        .route("/new_microblocks", post(routes::new_microblocks))
        .fallback(routes::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::record_raw_event,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Bind the configured address and serve until the process exits.
pub async fn serve(config: IngestConfig, store: Arc<dyn IngestStore>) -> Result<(), IngestError> {
    if !config.mode.ingests() {
        return Err(IngestError::Config(format!(
            "api mode {} does not run the event server",
            config.mode
        )));
    }
    let state = AppState::new(store, config.chain_id);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| IngestError::Config(format!("bind {}:{}: {e}", config.host, config.port)))?;
    info!(host = %config.host, port = config.port, "event server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| IngestError::Config(format!("event server terminated: {e}")))
}
