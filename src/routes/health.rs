//! Health and readiness endpoints
//!
//! Liveness is unconditional; readiness reflects leadership, so a fleet's
//! load balancer or supervisor can tell the active instance from standbys.

use crate::lock::LeaseState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub lease_state: &'static str,
}

fn lease_state_str(state: LeaseState) -> &'static str {
    match state {
        LeaseState::Seeking => "seeking",
        LeaseState::Held => "held",
        LeaseState::Lost => "lost",
        LeaseState::Released => "released",
    }
}

/// GET /health
///
/// Basic health check - returns 200 if the process is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready
///
/// Readiness check - 200 only while this instance holds the lease
pub async fn ready(
    State(lease_rx): State<watch::Receiver<LeaseState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let state = *lease_rx.borrow();
    let leading = state == LeaseState::Held;

    let status_code = if leading {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if leading { "ready" } else { "not_ready" },
            lease_state: lease_state_str(state),
        }),
    )
}

/// Build the health router over the leadership signal.
pub fn router(lease_rx: watch::Receiver<LeaseState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(lease_rx)
        .layer(TraceLayer::new_for_http())
}
