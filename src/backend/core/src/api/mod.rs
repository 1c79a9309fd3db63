//! HTTP API for the image generation service.
//!
//! # Routes
//!
//! - `GET /health`, `GET /metrics` (unversioned)
//! - `/api/v1/...` generation tasks, health and stats (see [`v1::routes`])
//!
//! Successful responses are wrapped in [`ApiResponse`]; errors use the
//! [`crate::error::ErrorResponse`] body produced by `ServiceError`.

mod handlers;
pub mod schemas;
pub mod v1;

use std::sync::Arc;

use axum::{http::Method, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GenerationConfig;
use crate::orchestrator::TaskOrchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TaskOrchestrator>,
    /// Defaults applied to requests that omit generation parameters
    pub generation: Arc<GenerationConfig>,
    /// Prometheus handle, absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, generation: GenerationConfig) -> Self {
        Self {
            orchestrator,
            generation: Arc::new(generation),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the API router.
///
/// ```rust,ignore
/// let state = AppState::new(orchestrator, config.generation.clone());
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        // Unversioned endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        // V1 API
        .nest(v1::V1_PREFIX, v1::routes::v1_router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
