//! HTTP handlers for the waypost server.
//!
//! Routes:
//! - `POST <endpoint>` - ingest a `players_pos` batch
//! - `GET /api/positions` - current snapshot
//! - `DELETE /api/positions?older_than=<secs>` - drop inactive players
//! - `GET /stream` - Server-Sent Events feed of snapshots
//! - `GET /health` - liveness and counts

use crate::config::Config;
use crate::metrics::{self, StreamMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use waypost_core::{Relay, StreamSession};
use waypost_protocol::{codec, ProtocolError};

/// Shared server state.
pub struct AppState {
    /// Position store and subscriber hub.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    /// Cancelled once the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Relay::with_mailbox_capacity(config.stream.mailbox_capacity),
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.endpoint, post(collect_handler))
        .route(
            "/api/positions",
            get(positions_handler).delete(evict_handler),
        )
        .route("/stream", get(stream_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(state.config.limits.max_body_bytes))
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("waypost listening on {}", addr);
    info!("Ingest endpoint: http://{}{}", addr, config.endpoint);

    let state = Arc::new(AppState::new(config));
    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_state.shutdown.cancel();
    });

    serve(listener, state).await
}

/// Serve on an already bound listener until `state.shutdown` is cancelled.
///
/// Open streams are closed when shutdown starts so the server can drain.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(Arc::clone(&state));
    let token = state.shutdown.clone();
    let drain_state = Arc::clone(&state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            info!("Shutting down, closing open streams");
            drain_state.relay.hub().close_all();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Map a decoding failure to its status, response text and metric label.
fn rejection(e: &ProtocolError) -> (StatusCode, &'static str, &'static str) {
    match e {
        ProtocolError::BadEncoding(_) => (StatusCode::BAD_REQUEST, "invalid json", "bad_encoding"),
        ProtocolError::UnexpectedSchema(_) => {
            (StatusCode::BAD_REQUEST, "unexpected payload", "unexpected_schema")
        }
        ProtocolError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error", "encode"),
    }
}

/// Ingest handler.
async fn collect_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let start = Instant::now();
    metrics::record_ingest_request();

    let batch = match codec::decode_collect(&body) {
        Ok(batch) => batch,
        Err(e) => {
            let (status, text, reason) = rejection(&e);
            debug!(error = %e, bytes = body.len(), "Rejected collect payload");
            metrics::record_rejected(reason);
            return (status, text).into_response();
        }
    };

    let outcome = state.relay.ingest(batch);
    metrics::record_ingest(&outcome, state.relay.store().len());
    metrics::record_latency(start.elapsed().as_secs_f64());

    (StatusCode::OK, "ok").into_response()
}

/// Snapshot handler.
async fn positions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.relay.positions())
}

#[derive(Debug, Deserialize)]
struct EvictParams {
    /// Inactivity threshold in seconds.
    older_than: Option<f64>,
}

/// Inactive player eviction handler.
async fn evict_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EvictParams>,
) -> Response {
    let max_age = match params.older_than {
        None => state.config.eviction.max_age(),
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(max_age) => max_age,
            Err(_) => {
                debug!(older_than = secs, "Rejected eviction threshold");
                return (StatusCode::BAD_REQUEST, "invalid older_than").into_response();
            }
        },
    };

    let outcome = state.relay.evict_stale(max_age);
    metrics::record_eviction(&outcome, state.relay.store().len());
    info!(
        removed = outcome.removed,
        max_age_secs = max_age.as_secs_f64(),
        "Evicted inactive players"
    );

    Json(serde_json::json!({ "removed": outcome.removed })).into_response()
}

/// Server-Sent Events handler.
///
/// The subscription is registered before the response headers go out and
/// released when the body stream is dropped, which happens on client
/// disconnect, write failure and shutdown alike.
async fn stream_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = StreamSession::connect(
        &state.relay,
        state.config.stream.keepalive(),
        state.shutdown.child_token(),
    );
    let guard = StreamMetricsGuard::new();
    let frames = session.into_stream().map(move |frame| {
        guard.record_frame(&frame);
        Ok::<_, Infallible>(codec::encode_frame(&frame))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(frames),
    )
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.relay.hub();
    let stats = hub.stats();
    let status = if hub.is_closed() { "shutting_down" } else { "ok" };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "players": state.relay.store().len(),
        "subscribers": stats.subscribers,
        "mailbox_capacity": hub.capacity(),
        "broadcasts": stats.broadcasts,
    }))
}
