pub mod config;
pub mod error;
pub mod generator;
pub mod health;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use checkgate_core::{ApplicationStore, CommitChecker};

pub struct AppState {
    pub store: Arc<dyn ApplicationStore>,
    pub checker: Arc<dyn CommitChecker>,
    /// Bearer token required on the generator endpoint, if any.
    pub plugin_auth_token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/getparams.execute", post(generator::getparams_handler))
        .route("/health", get(health::health_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
