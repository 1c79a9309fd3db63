//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, ServiceError>` so that errors
//! are automatically converted to appropriate HTTP status codes via the
//! `IntoResponse` implementation on `ServiceError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use super::schemas::{
    GenerateRequest, HealthResponse, StatsResponse, SystemInfo, TaskCreatedResponse,
    TaskEvictedResponse, TaskStatusResponse,
};
use super::{ApiResponse, AppState};
use crate::error::{ErrorCode, ServiceError};
use crate::jobs::{JobId, JobStatus};

fn parse_task_id(raw: &str) -> Result<JobId, ServiceError> {
    raw.parse::<JobId>().map_err(|_| {
        ServiceError::new(ErrorCode::JobNotFound, format!("Task not found: {}", raw))
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.orchestrator.backend();
    let model_loaded = backend.is_available();

    Json(HealthResponse {
        status: if model_loaded { "ok" } else { "error" }.to_string(),
        device: backend.device().to_string(),
        model_loaded,
        accepting_tasks: state.orchestrator.is_accepting(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generation Tasks
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(req) = payload.map_err(|rejection| ServiceError::validation(rejection.body_text()))?;

    let request = req.into_generation_request(&state.generation)?;
    let task_id = state.orchestrator.create(request)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(TaskCreatedResponse { task_id })),
    ))
}

/// Poll a task.
///
/// A failed task is reported as an error response carrying the stored error.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let id = parse_task_id(&id)?;
    let view = state.orchestrator.status(id)?;

    if view.status == JobStatus::Failed {
        let error = view.error.as_deref().unwrap_or("unknown error");
        return Err(ServiceError::execution_failed(id, error));
    }

    Ok(Json(ApiResponse::success(TaskStatusResponse::from(&view))))
}

pub async fn evict_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let id = parse_task_id(&id)?;
    let view = state.orchestrator.evict(id)?;

    Ok(Json(ApiResponse::success(TaskEvictedResponse {
        task_id: view.id,
        status: view.status,
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// System
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_system_stats(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let backend = orchestrator.backend();

    Json(ApiResponse::success(StatsResponse {
        tasks: orchestrator.counts(),
        worker_pool: orchestrator.pool_stats(),
        system: SystemInfo::new(backend.name(), backend.device(), &state.generation),
        service_status: if orchestrator.is_accepting() {
            "running"
        } else {
            "shutting_down"
        }
        .to_string(),
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
