//! HTTP Query Front-End
//!
//! A thin axum surface over the query pipeline:
//!
//! - `GET /?query=<urlencoded expr>` - stream matching events as
//!   line-delimited JSON.
//! - `GET /health` - liveness probe.
//!
//! Parse and semantic failures map to 400 with the error text; runtime
//! query failures terminate the stream after an error line.

use crate::archive::{ArchiveHandle, SinkMsg};
use crate::index::IndexHandle;
use crate::query::Exporter;
use crate::value::Schema;
use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub archive: ArchiveHandle,
    pub index: IndexHandle,
    pub schema: Arc<Schema>,
    /// Matches emitted per batch before the exporter pauses.
    pub batch_size: u64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(query_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the API on `addr` until the process exits.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "query API listening");
    axum::serve(listener, build_router(state)).await
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
}

async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Response {
    let (sink_tx, sink_rx) = mpsc::channel::<SinkMsg>(64);
    let exporter = match Exporter::spawn(
        state.archive.clone(),
        state.index.clone(),
        sink_tx,
        &params.query,
        &state.schema,
    ) {
        Ok(exporter) => exporter,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    exporter.start().await;

    // Relay sink messages into NDJSON lines, nudging the exporter
    // whenever a batch of matches has been consumed.
    let (line_tx, line_rx) = mpsc::channel::<Result<String, std::io::Error>>(64);
    let batch_size = state.batch_size.max(1);
    tokio::spawn(relay(sink_rx, line_tx, exporter, batch_size));

    Body::from_stream(ReceiverStream::new(line_rx)).into_response()
}

async fn relay(
    mut sink_rx: mpsc::Receiver<SinkMsg>,
    line_tx: mpsc::Sender<Result<String, std::io::Error>>,
    exporter: Exporter,
    batch_size: u64,
) {
    let mut received = 0u64;
    while let Some(msg) = sink_rx.recv().await {
        match msg {
            SinkMsg::Created(_) => {}
            SinkMsg::Event(event) => {
                received += 1;
                let line = match serde_json::to_string(&event) {
                    Ok(json) => json + "\n",
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize event");
                        continue;
                    }
                };
                if line_tx.send(Ok(line)).await.is_err() {
                    // Client went away; stop the query.
                    exporter.shutdown().await;
                    return;
                }
                if received % batch_size == 0 {
                    exporter.next_chunk().await;
                }
            }
            SinkMsg::Error { message, .. } => {
                let line = serde_json::json!({ "error": message }).to_string() + "\n";
                let _ = line_tx.send(Ok(line)).await;
            }
            SinkMsg::Done { id, runtime } => {
                tracing::debug!(%id, ?runtime, "query stream complete");
                exporter.shutdown().await;
                return;
            }
        }
    }
}
