//! HTTP ingest surface for out-of-process event producers.
//!
//! A page (or anything else emitting interaction envelopes) can POST channel
//! messages here instead of using the in-process [`crate::sensor::Sensor`].
//! Accepted messages are forwarded into the same Sensor → Agent channel; the
//! server adds no durability of its own.
//!
//! # Architecture
//!
//! ```text
//! Page ──→ POST /ingest ──→ channel ──→ DeliveryAgent ──→ collector
//! ```

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::sensor::ChannelMessage;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state.
pub struct ServerState {
    /// Sender side of the Sensor → Agent channel
    sender: Sender<ChannelMessage>,
}

/// Response from the ingest endpoint.
#[derive(Serialize)]
pub struct IngestResponse {
    pub status: String,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /ingest
///
/// Accepts a `{type: "event", data: <envelope>}` channel message and forwards
/// it to the agent. The channel is fire-and-forget, so a 202 means "handed to
/// the pipeline", not "delivered to the collector".
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(message): Json<ChannelMessage>,
) -> Result<(StatusCode, Json<IngestResponse>), (StatusCode, Json<ErrorResponse>)> {
    if message.parse_event().is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Body is not a well-formed event message".to_string(),
                code: "INVALID_EVENT".to_string(),
            }),
        ));
    }

    if state.sender.try_send(message).is_err() {
        tracing::warn!("agent channel unavailable, rejecting ingest");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Agent channel is full or closed".to_string(),
                code: "CHANNEL_UNAVAILABLE".to_string(),
            }),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted".to_string(),
        }),
    ))
}

/// Run the HTTP server, forwarding accepted messages into `sender`.
pub async fn run(
    config: ServerConfig,
    sender: Sender<ChannelMessage>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState { sender });

    let app = Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("telemetry ingest server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
