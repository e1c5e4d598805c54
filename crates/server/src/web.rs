//! HTTP surface of the relay: ingestion, range queries, the live
//! websocket stream and the liveness probe.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use kubestat_common::PodSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::hub::{Hub, MAILBOX_CAP};
use crate::ingest::IngestQueue;
use crate::store::{StatQuery, Store, StoreError};

pub struct AppState {
    pub hub: Arc<Hub>,
    pub queue: IngestQueue,
    pub store: Arc<dyn Store>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => {
                warn!(error = %e, "store query failed");
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/stats", post(push_stats))
        .route("/api/stats", get(get_stats))
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(cors)
}

/// Accepts a raw batch into the ingestion queue and responds immediately.
/// Acceptance means neither broadcast nor persisted yet; a shed batch still
/// gets a 200, the producer is never slowed down.
async fn push_stats(State(state): State<Arc<AppState>>, body: Bytes) -> &'static str {
    state.queue.enqueue(body);
    "OK"
}

/// `start`/`end` are offsets in seconds before now; `name` is a prefix
/// filter on the resolved pod name.
#[derive(Deserialize)]
struct StatParams {
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: i64,
    #[serde(default)]
    name: String,
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatParams>,
) -> Result<Json<Vec<PodSample>>, AppError> {
    if params.start < params.end {
        return Err(AppError::InvalidInput(
            "start must reach at least as far back as end".to_string(),
        ));
    }

    let query = StatQuery {
        start_secs: params.start,
        end_secs: params.end,
        name_prefix: params.name,
    };
    let samples = state.store.get(&query).await?;
    Ok(Json(samples))
}

#[derive(Serialize)]
struct Health {
    incoming: usize,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        incoming: state.queue.depth(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel(MAILBOX_CAP);
    let (guard, history) = state.hub.join(tx);

    let delivery = tokio::spawn(async move { deliver(&mut sink, history, rx).await });

    // Client-to-server messages are ignored; the read side only detects
    // disconnect.
    while let Some(Ok(msg)) = stream.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
    debug!("websocket client disconnected");

    // Deregister, which closes the mailbox and lets the delivery task
    // finish.
    drop(guard);
    let _ = delivery.await;
}

/// The subscriber's delivery loop: replay first, then stream the mailbox.
/// Registration and the history snapshot happened under one hub lock, so
/// every broadcast after the snapshot is already queued in the mailbox in
/// arrival order, with no duplicate and no gap. Ends on a write failure or
/// when the mailbox closes.
async fn deliver<S>(sink: &mut S, history: Vec<Bytes>, mut rx: mpsc::Receiver<Bytes>)
where
    S: futures_util::Sink<Message> + Unpin,
{
    for batch in history {
        if send_frame(sink, batch).await.is_err() {
            return;
        }
    }
    while let Some(batch) = rx.recv().await {
        if send_frame(sink, batch).await.is_err() {
            return;
        }
    }
}

async fn send_frame<S>(sink: &mut S, batch: Bytes) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    // Frames are the raw ingested bytes; every accepted batch was JSON, so
    // non-UTF-8 payloads cannot occur and are simply skipped.
    let Ok(text) = String::from_utf8(batch.to_vec()) else {
        return Ok(());
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
