#![allow(clippy::result_large_err)]
//! # Imagegen Core
//!
//! Asynchronous img2img generation behind a submit-and-poll API.
//!
//! ## Architecture
//!
//! - **Jobs**: Job records, the lifecycle state machine, and retention sweeping
//! - **Orchestrator**: The job table, bounded worker pool, and execution driver
//! - **Backend**: The execution backend contract and a simulated pipeline
//! - **API**: Axum routes for submitting, polling and evicting tasks
//! - **Observability**: Structured logging and Prometheus metrics

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod orchestrator;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, ServiceError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{
        BackendError, ExecutionBackend, GenerationRequest, ProgressHook, SimulatedBackend,
    };
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, ServiceError};
    pub use crate::jobs::{JobCounts, JobId, JobStatus, JobView, RetentionSweeper};
    pub use crate::orchestrator::{
        OrchestratorConfig, ProgressBand, ShutdownReport, TaskOrchestrator, WorkerPoolStats,
    };
}
