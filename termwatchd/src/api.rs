//! HTTP API for the termwatch daemon.
//!
//! Provides administrative endpoints:
//! - Health report (JSON)
//! - Prometheus metrics (text exposition)

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::health::{HealthReport, HealthState};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub health: Arc<HealthState>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health report endpoint.
async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthReport> {
    Json(state.health.report())
}

/// Prometheus scrape endpoint.
async fn metrics_handler(State(state): State<Arc<ApiState>>) -> Response {
    match state.health.metrics_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
