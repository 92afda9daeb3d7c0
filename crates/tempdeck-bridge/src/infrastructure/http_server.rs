//! HTTP server: chart page, health report and the viewer WebSocket.
//!
//! | Route     | Purpose                                              |
//! |-----------|------------------------------------------------------|
//! | `GET /`   | Chart page, parameterized with broker and topic      |
//! | `GET /ws` | WebSocket upgrade; one relay session per connection  |
//! | `GET /health` | JSON snapshot of broker state and relay counters |
//!
//! Each upgraded WebSocket runs in its own task (axum spawns it), so one slow
//! browser never delays another.  The task is the single consumer of its
//! session queue.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::Relay;
use crate::domain::Message;
use crate::infrastructure::page::render_viewer_page;
use crate::infrastructure::subscription::SubscriptionState;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    relay: Relay,
    page: Bytes,
    topic: Arc<str>,
    broker_state: watch::Receiver<SubscriptionState>,
}

impl AppState {
    /// Renders the chart page once; it never changes while running.
    pub fn new(
        relay: Relay,
        broker: &str,
        topic: &str,
        broker_state: watch::Receiver<SubscriptionState>,
    ) -> Self {
        Self {
            relay,
            page: Bytes::from(render_viewer_page(broker, topic)),
            topic: Arc::from(topic),
            broker_state,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub broker: SubscriptionState,
    pub topic: String,
    pub sessions: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves until `cancel` fires, then stops accepting and returns.
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on http://{addr}");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn page_handler(State(state): State<AppState>) -> Html<Bytes> {
    Html(state.page.clone())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let broker = *state.broker_state.borrow();
    let stats = state.relay.stats();
    let healthy = broker == SubscriptionState::Subscribed && state.relay.is_running();

    let report = HealthReport {
        status: if healthy { "ok" } else { "degraded" },
        broker,
        topic: state.topic.to_string(),
        sessions: stats.sessions,
        published: stats.published,
        delivered: stats.delivered,
        dropped: stats.dropped,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer_session(socket, state.relay))
}

// ── Per-viewer session ────────────────────────────────────────────────────────

/// Forwards relay messages to one browser until either side ends.
///
/// The session ends when the browser closes or errors, when a send fails, or
/// when the relay ends the session (shutdown after draining).  Dropping the
/// handle on return deregisters it.
async fn viewer_session(socket: WebSocket, relay: Relay) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut handle = match relay.register() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("refusing viewer: {e}");
            let frame = close_frame(close_code::AGAIN, e.to_string());
            if let Err(e) = ws_tx.send(frame).await {
                debug!("failed to send refusal close frame: {e}");
            }
            return;
        }
    };
    let id = handle.id();
    info!(session = %id, "viewer connected");

    loop {
        tokio::select! {
            next = handle.recv() => match next {
                Some(message) => {
                    if let Err(e) = ws_tx.send(to_ws_frame(message)).await {
                        debug!(session = %id, "send to viewer failed: {e}");
                        break;
                    }
                }
                None => {
                    let frame = close_frame(close_code::AWAY, "relay shutting down".to_string());
                    if let Err(e) = ws_tx.send(frame).await {
                        debug!(session = %id, "failed to send close frame: {e}");
                    }
                    break;
                }
            },

            inbound = ws_rx.next() => match inbound {
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(session = %id, "viewer closed the socket");
                    break;
                }
                Some(Err(e)) => {
                    debug!(session = %id, "viewer socket error: {e}");
                    break;
                }
                // The page never sends anything meaningful.
                Some(Ok(_)) => {}
            },
        }
    }

    let dropped = handle.dropped();
    drop(handle);
    info!(session = %id, dropped, "viewer disconnected");
}

/// Text frame for UTF-8 payloads (the JSON the page expects), binary
/// otherwise.  The payload bytes are forwarded unchanged either way.
fn to_ws_frame(message: Message) -> WsMessage {
    match message.as_text() {
        Some(text) => WsMessage::Text(text.to_owned().into()),
        None => WsMessage::Binary(message.into_bytes()),
    }
}

fn close_frame(code: u16, reason: String) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
