//! Health check endpoints.
//!
//! Used by load balancers and monitoring systems to verify service health.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use simbay_runtime::health::{self, HealthReport};

/// Liveness: the process is up. Does not touch dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: store reachability and kiosk connections.
///
/// ```text
/// GET /health/ready
/// ```
///
/// - 200 OK: healthy or degraded (no kiosk connected)
/// - 503 Service Unavailable: the store cannot be reached
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = health::report(state.store.as_ref(), &state.coordinator, state.clock.now()).await;
    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
