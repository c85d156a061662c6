//! Readiness endpoint.
//!
//! Probes the store and GitHub concurrently. Both must report healthy for a
//! 200; otherwise the same body is returned with 503 so orchestrators stop
//! routing traffic here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub github: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database && self.github
    }
}

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 503 Service Unavailable
/// Content-Type: application/json
///
/// {"database":true,"github":false}
/// ```
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let (database, github) = tokio::join!(state.store.health_check(), state.checker.health_check());
    let report = HealthReport { database, github };

    if report.is_healthy() {
        (StatusCode::OK, Json(report))
    } else {
        warn!("Health check failed: {:?}", report);
        (StatusCode::SERVICE_UNAVAILABLE, Json(report))
    }
}
