//! HTTP server hosting the gate and its operational routes.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::middleware::with_admission_gate;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionGate;
use crate::store::CounterStore;

/// Health report returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `ok` when the store answers, `degraded` when the gate is failing open
    pub status: String,
    /// Whether the counter store answered a ping
    pub store: bool,
}

/// Build the application router with the gate in front of every route.
pub fn router<S>(gate: Arc<AdmissionGate<S>>) -> Router
where
    S: CounterStore + ?Sized + 'static,
{
    let routes = Router::new()
        .route("/test-limit", get(test_limit))
        .route("/health", get(health::<S>))
        .route("/metrics", get(metrics::<S>))
        .with_state(gate.clone());

    with_admission_gate(routes, gate).layer(TraceLayer::new_for_http())
}

async fn test_limit() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "msg": "OK" }))
}

async fn health<S>(State(gate): State<Arc<AdmissionGate<S>>>) -> Json<HealthStatus>
where
    S: CounterStore + ?Sized + 'static,
{
    let store = match gate.check_store().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check: counter store unavailable");
            false
        }
    };

    Json(HealthStatus {
        status: if store { "ok" } else { "degraded" }.to_string(),
        store,
    })
}

async fn metrics<S>(State(gate): State<Arc<AdmissionGate<S>>>) -> Response
where
    S: CounterStore + ?Sized + 'static,
{
    match gate.metrics().render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// HTTP server for the admission gate.
pub struct HttpServer<S: CounterStore + ?Sized + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission gate
    gate: Arc<AdmissionGate<S>>,
}

impl<S: CounterStore + ?Sized + 'static> HttpServer<S> {
    /// Create a new server.
    pub fn new(addr: SocketAddr, gate: Arc<AdmissionGate<S>>) -> Self {
        Self { addr, gate }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind");
            TurnstileError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            limit = self.gate.config().limit,
            window_seconds = self.gate.config().window_seconds,
            "Starting HTTP server"
        );

        axum::serve(
            listener,
            router(self.gate).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}
