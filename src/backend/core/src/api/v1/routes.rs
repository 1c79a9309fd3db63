//! V1 API routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/`.
///
/// # Endpoints
///
/// ## Generation
/// - `POST /api/v1/generate` - Submit an img2img task
/// - `GET /api/v1/generate/tasks/:id` - Poll a task
/// - `DELETE /api/v1/generate/tasks/:id` - Evict a finished task
///
/// ## System
/// - `GET /api/v1/health` - Backend health
/// - `GET /api/v1/stats` - Task counts, worker pool and system information
pub fn v1_router() -> Router<AppState> {
    Router::new()
        // Generation endpoints
        .route("/generate", post(handlers::create_task))
        .route(
            "/generate/tasks/:id",
            get(handlers::get_task_status).delete(handlers::evict_task),
        )
        // System
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_system_stats))
}

/// V1 API route constants for use in clients and documentation.
pub mod paths {
    pub const GENERATE: &str = "/api/v1/generate";
    pub const TASK: &str = "/api/v1/generate/tasks/:id";
    pub const HEALTH: &str = "/api/v1/health";
    pub const STATS: &str = "/api/v1/stats";

    /// Concrete path for one task.
    pub fn task(id: impl std::fmt::Display) -> String {
        format!("/api/v1/generate/tasks/{}", id)
    }
}
