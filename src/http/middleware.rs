//! Axum middleware that runs the admission gate before any handler.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::ratelimit::AdmissionGate;
use crate::store::CounterStore;

/// Client address used when the peer address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    pub detail: String,
}

/// The response sent when a request is over quota.
///
/// Carries only the configured message, never store or error details.
#[derive(Debug, Clone)]
pub struct Rejection {
    detail: String,
}

impl Rejection {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RejectionBody {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

/// Rate limiting middleware function.
///
/// Admitted requests are passed to `next` exactly once. Rejected requests
/// never reach it.
pub async fn admission_middleware<S>(
    State(gate): State<Arc<AdmissionGate<S>>>,
    request: Request,
    next: Next,
) -> Response
where
    S: CounterStore + ?Sized + 'static,
{
    let client = client_address(&request);
    let decision = gate.admit(&client, request.uri().path()).await;

    if decision.allow {
        next.run(request).await
    } else {
        Rejection::new(gate.config().rejection_message.as_str()).into_response()
    }
}

/// Mount the gate in front of every route of `router`.
pub fn with_admission_gate<S>(router: Router, gate: Arc<AdmissionGate<S>>) -> Router
where
    S: CounterStore + ?Sized + 'static,
{
    router.layer(middleware::from_fn_with_state(
        gate,
        admission_middleware::<S>,
    ))
}

/// The peer IP of the connection, or [`UNKNOWN_CLIENT`] when the server was
/// not started with connect info.
fn client_address(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
