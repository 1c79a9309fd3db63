//! Task Orchestrator - Owns the job table and drives every job to a terminal state.
//!
//! Clients register work with [`TaskOrchestrator::create`] and poll it with
//! [`TaskOrchestrator::status`]. Each job runs through the execution driver
//! inside a [`WorkerPool`] slot; the backend is the only blocking call and it
//! never runs under the job table lock.

pub mod progress;
pub mod worker_pool;

pub use progress::ProgressBand;
pub use worker_pool::{WorkOutcome, WorkerPool, WorkerPoolConfig, WorkerPoolStats};

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, ExecutionBackend, GenerationRequest, ProgressHook};
use crate::error::{ErrorCode, Result, ServiceError};
use crate::jobs::{JobCounts, JobId, JobRecord, JobView};
use crate::observability::metrics as names;

/// Error text recorded on jobs that were still outstanding when shutdown gave up.
pub const SHUTDOWN_ERROR: &str = "service shut down before the job finished";

/// Configuration for the TaskOrchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker slots, i.e. jobs executing at once
    pub max_concurrent_jobs: usize,

    /// Upper bound on records held in the job table
    pub max_tracked_jobs: usize,

    /// Progress milestones published around the backend call
    pub progress: ProgressBand,

    /// How long shutdown waits for outstanding jobs
    pub shutdown_timeout: Duration,

    /// Worker pool name used in logs and stats
    pub pool_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_tracked_jobs: 10_000,
            progress: ProgressBand::default(),
            shutdown_timeout: Duration::from_secs(30),
            pool_name: "generation".to_string(),
        }
    }
}

/// Outcome of [`TaskOrchestrator::shutdown`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Whether outstanding work outlived the shutdown timeout
    pub timed_out: bool,
    /// Jobs force-failed because they had not finished
    pub drained: usize,
    /// Job table totals after shutdown
    pub counts: JobCounts,
}

/// State shared between the orchestrator and its in-flight jobs.
struct Shared {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    backend: Arc<dyn ExecutionBackend>,
    band: ProgressBand,
}

impl Shared {
    /// The execution driver: runs one job from Pending to a terminal state.
    fn execute(&self, id: JobId) -> WorkOutcome {
        let Some(payload) = self.begin(id) else {
            return WorkOutcome::Failed;
        };

        self.publish_progress(id, self.band.start());

        let hook = |step: u32, total: u32| self.publish_progress(id, self.band.scale(step, total));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.backend.execute(&payload, Some(&hook as &dyn ProgressHook))
        }));

        match outcome {
            Ok(Ok(result)) => {
                self.publish_progress(id, self.band.post_processing());
                self.complete(id, result)
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %id, kind = e.kind(), error = %e, "Backend failed");
                self.fail(id, describe_failure(&e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %id, panic = %message, "Backend panicked");
                self.fail(id, format!("task execution failed: backend panicked: {}", message))
            }
        }
    }

    fn begin(&self, id: JobId) -> Option<Arc<GenerationRequest>> {
        let mut jobs = self.jobs.write();
        let Some(record) = jobs.get_mut(&id) else {
            tracing::warn!(job_id = %id, "Job disappeared before it could start");
            return None;
        };
        if let Err(e) = record.start() {
            tracing::warn!(job_id = %id, error = %e, "Rejected job start");
            e.log();
            return None;
        }
        tracing::info!(job_id = %id, "Job started");
        Some(record.payload().clone())
    }

    fn publish_progress(&self, id: JobId, value: u8) {
        if let Some(record) = self.jobs.write().get_mut(&id) {
            if record.report_progress(value) {
                tracing::trace!(job_id = %id, progress = value, "Job progress");
            }
        }
    }

    fn complete(&self, id: JobId, result: String) -> WorkOutcome {
        let mut jobs = self.jobs.write();
        let Some(record) = jobs.get_mut(&id) else {
            tracing::warn!(job_id = %id, "Job vanished before completing");
            return WorkOutcome::Failed;
        };

        match record.complete(result) {
            Ok(()) => {
                counter!(names::JOBS_COMPLETED).increment(1);
                tracing::info!(job_id = %id, "Job completed");
                WorkOutcome::Succeeded
            }
            Err(e) if e.code() == ErrorCode::InvariantViolation => {
                e.log();
                Self::record_failure(record, "task execution failed: backend returned an empty result")
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Discarded late job result");
                WorkOutcome::Failed
            }
        }
    }

    fn fail(&self, id: JobId, error: String) -> WorkOutcome {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id) {
            Some(record) => Self::record_failure(record, error),
            None => {
                tracing::warn!(job_id = %id, "Job vanished before failing");
                WorkOutcome::Failed
            }
        }
    }

    fn record_failure(record: &mut JobRecord, error: impl Into<String>) -> WorkOutcome {
        let error = error.into();
        match record.fail(error.as_str()) {
            Ok(()) => {
                counter!(names::JOBS_FAILED).increment(1);
                tracing::warn!(job_id = %record.id(), error = %error, "Job failed");
            }
            Err(e) => {
                tracing::warn!(job_id = %record.id(), error = %e, "Discarded late job failure");
            }
        }
        WorkOutcome::Failed
    }
}

fn describe_failure(error: &BackendError) -> String {
    format!("task execution failed: {}", error)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owns the job table and mediates every read and write of job state.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    pool: WorkerPool,
    config: OrchestratorConfig,
    accepting: AtomicBool,
}

impl TaskOrchestrator {
    /// Create an orchestrator and its worker pool on the current tokio runtime.
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn ExecutionBackend>) -> Result<Self> {
        let pool = WorkerPool::new(
            WorkerPoolConfig::default()
                .with_max_workers(config.max_concurrent_jobs)
                .with_name(config.pool_name.clone()),
        )?;

        tracing::info!(
            backend = backend.name(),
            device = backend.device(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            max_tracked_jobs = config.max_tracked_jobs,
            "Task orchestrator created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                backend,
                band: config.progress,
            }),
            pool,
            config,
            accepting: AtomicBool::new(true),
        })
    }

    /// Register a job and hand it to the worker pool without waiting for it.
    pub fn create(&self, payload: GenerationRequest) -> Result<JobId> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ServiceError::service_unavailable(
                "orchestrator",
                "shutting down, not accepting new tasks",
            ));
        }

        let id = JobId::new();
        {
            let mut jobs = self.shared.jobs.write();
            if jobs.len() >= self.config.max_tracked_jobs {
                return Err(ServiceError::resource_exhausted(
                    "job_table",
                    self.config.max_tracked_jobs,
                ));
            }
            if jobs.contains_key(&id) {
                return Err(ServiceError::new(
                    ErrorCode::ResourceExhausted,
                    "Could not allocate a unique task id",
                )
                .with_context("job_id", id.to_string()));
            }
            jobs.insert(id, JobRecord::new(id, payload));
        }

        let shared = self.shared.clone();
        if let Err(e) = self.pool.submit(id, move || shared.execute(id)) {
            self.shared.jobs.write().remove(&id);
            return Err(e);
        }

        counter!(names::JOBS_CREATED).increment(1);
        tracing::info!(job_id = %id, pool = %self.pool.name(), "Job created");
        Ok(id)
    }

    /// Snapshot a job's current state.
    pub fn status(&self, id: JobId) -> Result<JobView> {
        self.shared
            .jobs
            .read()
            .get(&id)
            .map(JobRecord::view)
            .ok_or_else(|| ServiceError::job_not_found(id))
    }

    /// Count tracked jobs per state.
    pub fn counts(&self) -> JobCounts {
        self.shared.jobs.read().values().map(JobRecord::status).collect()
    }

    /// Remove finished jobs created more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_before(cutoff)
    }

    /// Remove finished jobs created strictly before `cutoff`.
    ///
    /// Pending and running jobs are never removed.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.shared.jobs.write();
        let before = jobs.len();
        jobs.retain(|id, record| {
            let expired = record.is_terminal() && record.created_at() < cutoff;
            if expired {
                tracing::debug!(job_id = %id, status = %record.status(), "Sweeping job");
            }
            !expired
        });
        let removed = before - jobs.len();
        drop(jobs);

        if removed > 0 {
            counter!(names::JOBS_SWEPT).increment(removed as u64);
            tracing::info!(removed = removed, cutoff = %cutoff, "Swept finished jobs");
        }
        removed
    }

    /// Remove one finished job right away, returning its final snapshot.
    pub fn evict(&self, id: JobId) -> Result<JobView> {
        let mut jobs = self.shared.jobs.write();
        let status = match jobs.get(&id) {
            Some(record) => record.status(),
            None => return Err(ServiceError::job_not_found(id)),
        };
        if !status.is_terminal() {
            return Err(ServiceError::job_not_terminal(id, status));
        }
        let view = jobs
            .remove(&id)
            .map(|record| record.view())
            .ok_or_else(|| ServiceError::job_not_found(id))?;
        drop(jobs);

        tracing::info!(job_id = %id, status = %view.status, "Job evicted");
        Ok(view)
    }

    /// Stop accepting jobs and wait for outstanding ones.
    ///
    /// Jobs still unfinished after `shutdown_timeout` are failed with
    /// [`SHUTDOWN_ERROR`]. Calling this more than once is harmless.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.accepting.store(false, Ordering::Release);
        tracing::info!(
            timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
            "Task orchestrator shutting down"
        );

        let timed_out = !self.pool.shutdown(self.config.shutdown_timeout).await;
        let drained = self.drain_unfinished();
        let report = ShutdownReport {
            timed_out,
            drained,
            counts: self.counts(),
        };

        tracing::info!(
            timed_out = report.timed_out,
            drained = report.drained,
            total = report.counts.total,
            "Task orchestrator stopped"
        );
        report
    }

    fn drain_unfinished(&self) -> usize {
        let mut jobs = self.shared.jobs.write();
        let mut drained = 0;
        for record in jobs.values_mut().filter(|record| !record.is_terminal()) {
            if record.abandon(SHUTDOWN_ERROR).is_ok() {
                counter!(names::JOBS_FAILED).increment(1);
                tracing::warn!(job_id = %record.id(), "Job failed by shutdown");
                drained += 1;
            }
        }
        drained
    }

    /// Whether new jobs are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.shared.backend
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get worker pool statistics.
    pub fn pool_stats(&self) -> WorkerPoolStats {
        self.pool.stats()
    }
}
