//! Worker Pool - Runs blocking jobs under a fixed concurrency limit.
//!
//! The `WorkerPool` provides:
//! - A fixed number of execution slots guarded by a fair tokio Semaphore
//! - Non-blocking submission; queued work waits for a slot in FIFO order
//! - Blocking execution on tokio's blocking thread pool
//! - Bounded graceful shutdown via a task tracker
//! - Pool statistics and monitoring

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::error::{Result, ServiceError};
use crate::jobs::JobId;
use crate::observability::metrics as names;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of jobs executing at once
    pub max_workers: usize,
    /// Name for this pool (for logging/metrics)
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            name: "generation".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create with a specific slot count.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Create with a specific name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// What a unit of work reports back to the pool once it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Succeeded,
    Failed,
}

/// Internal statistics tracking.
struct PoolStats {
    /// Total jobs submitted
    tasks_submitted: AtomicU64,
    /// Successful completions
    tasks_succeeded: AtomicU64,
    /// Failed completions (including panics that escaped the work)
    tasks_failed: AtomicU64,
    /// Jobs dropped because the pool closed before they got a slot
    tasks_abandoned: AtomicU64,
    /// Total time waiting for slots (microseconds)
    total_wait_time_us: AtomicU64,
    /// Total execution time (microseconds)
    total_exec_time_us: AtomicU64,
    /// Peak concurrent workers
    peak_concurrent: AtomicUsize,
    /// Current concurrent workers
    current_concurrent: AtomicUsize,
}

impl PoolStats {
    fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_abandoned: AtomicU64::new(0),
            total_wait_time_us: AtomicU64::new(0),
            total_exec_time_us: AtomicU64::new(0),
            peak_concurrent: AtomicUsize::new(0),
            current_concurrent: AtomicUsize::new(0),
        }
    }

    fn record_submit(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_acquire(&self, wait_time: Duration) {
        self.total_wait_time_us
            .fetch_add(wait_time.as_micros() as u64, Ordering::Relaxed);
        let current = self.current_concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_concurrent.fetch_max(current, Ordering::Relaxed);
    }

    fn record_finish(&self, outcome: WorkOutcome, duration: Duration) {
        match outcome {
            WorkOutcome::Succeeded => self.tasks_succeeded.fetch_add(1, Ordering::Relaxed),
            WorkOutcome::Failed => self.tasks_failed.fetch_add(1, Ordering::Relaxed),
        };
        self.total_exec_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.current_concurrent.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_abandoned(&self) {
        self.tasks_abandoned.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs submitted jobs with at most `max_workers` executing at once.
pub struct WorkerPool {
    /// Configuration
    config: WorkerPoolConfig,
    /// Fair semaphore handing out execution slots
    semaphore: Arc<Semaphore>,
    /// Pool statistics
    stats: Arc<PoolStats>,
    /// Tracks every submitted job until it finishes
    tracker: TaskTracker,
    /// Runtime the pool spawns onto
    runtime: Handle,
    /// When the pool was created
    created_at: Instant,
}

impl WorkerPool {
    /// Create a new worker pool bound to the current tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(ServiceError::configuration(format!(
                "worker pool '{}' needs at least one worker",
                config.name
            )));
        }
        let runtime = Handle::try_current().map_err(|e| {
            ServiceError::internal(format!(
                "worker pool '{}' must be created inside a tokio runtime: {}",
                config.name, e
            ))
        })?;

        tracing::info!(
            pool_name = %config.name,
            max_workers = config.max_workers,
            "Worker pool created"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            stats: Arc::new(PoolStats::new()),
            tracker: TaskTracker::new(),
            runtime,
            created_at: Instant::now(),
            config,
        })
    }

    /// Get the pool name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get maximum worker count.
    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Get current available slots.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get current number of executing jobs.
    pub fn active_workers(&self) -> usize {
        self.stats.current_concurrent.load(Ordering::Relaxed)
    }

    /// Check if every slot is taken.
    pub fn is_at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Check whether the pool has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Queue `run` for execution and return immediately.
    ///
    /// `run` executes on a blocking thread once a slot is free; the slot is
    /// held until it returns.
    pub fn submit<F>(&self, job_id: JobId, run: F) -> Result<()>
    where
        F: FnOnce() -> WorkOutcome + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(ServiceError::service_unavailable(
                self.config.name.clone(),
                "worker pool is shut down",
            ));
        }

        self.stats.record_submit();

        let semaphore = self.semaphore.clone();
        let stats = self.stats.clone();
        let pool_name = self.config.name.clone();
        let queued_at = Instant::now();

        self.tracker.spawn_on(
            async move {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        stats.record_abandoned();
                        tracing::warn!(
                            pool_name = %pool_name,
                            job_id = %job_id,
                            "Worker pool closed before job got a slot"
                        );
                        return;
                    }
                };

                let wait_time = queued_at.elapsed();
                stats.record_acquire(wait_time);
                histogram!(names::QUEUE_WAIT).record(wait_time.as_secs_f64());
                gauge!(names::JOBS_RUNNING).increment(1.0);

                tracing::debug!(
                    pool_name = %pool_name,
                    job_id = %job_id,
                    wait_time_ms = wait_time.as_millis() as u64,
                    available = semaphore.available_permits(),
                    "Worker permit acquired"
                );

                let started = Instant::now();
                let outcome = match tokio::task::spawn_blocking(run).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(
                            pool_name = %pool_name,
                            job_id = %job_id,
                            error = %e,
                            "Worker thread terminated abnormally"
                        );
                        WorkOutcome::Failed
                    }
                };
                let exec_time = started.elapsed();

                stats.record_finish(outcome, exec_time);
                gauge!(names::JOBS_RUNNING).decrement(1.0);
                histogram!(names::JOB_DURATION).record(exec_time.as_secs_f64());
                drop(permit);
            },
            &self.runtime,
        );

        Ok(())
    }

    /// Stop accepting work and wait up to `timeout` for submitted jobs.
    ///
    /// Returns `true` if everything finished in time. On timeout the semaphore
    /// is closed so queued jobs never start; jobs already executing keep their
    /// blocking thread until the backend returns.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();

        tracing::info!(
            pool_name = %self.config.name,
            outstanding = self.tracker.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Worker pool shutting down"
        );

        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();

        if !drained {
            self.semaphore.close();
            tracing::warn!(
                pool_name = %self.config.name,
                outstanding = self.tracker.len(),
                "Worker pool shutdown timed out"
            );
        }

        drained
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let stats = &self.stats;
        let tasks_submitted = stats.tasks_submitted.load(Ordering::Relaxed);
        let tasks_succeeded = stats.tasks_succeeded.load(Ordering::Relaxed);
        let tasks_failed = stats.tasks_failed.load(Ordering::Relaxed);
        let total_completed = tasks_succeeded + tasks_failed;

        let avg_wait_time_us = if total_completed > 0 {
            stats.total_wait_time_us.load(Ordering::Relaxed) / total_completed
        } else {
            0
        };

        let avg_exec_time_us = if total_completed > 0 {
            stats.total_exec_time_us.load(Ordering::Relaxed) / total_completed
        } else {
            0
        };

        WorkerPoolStats {
            name: self.config.name.clone(),
            max_workers: self.config.max_workers,
            available_permits: self.semaphore.available_permits(),
            active_workers: self.active_workers(),
            queued: self.tracker.len().saturating_sub(self.active_workers()),
            tasks_submitted,
            tasks_succeeded,
            tasks_failed,
            tasks_abandoned: stats.tasks_abandoned.load(Ordering::Relaxed),
            peak_concurrent: stats.peak_concurrent.load(Ordering::Relaxed),
            avg_wait_time_us,
            avg_exec_time_us,
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Statistics for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Pool name
    pub name: String,
    /// Maximum workers configured
    pub max_workers: usize,
    /// Currently available slots
    pub available_permits: usize,
    /// Currently executing jobs
    pub active_workers: usize,
    /// Jobs waiting for a slot
    pub queued: usize,
    /// Total jobs submitted
    pub tasks_submitted: u64,
    /// Jobs whose work reported success
    pub tasks_succeeded: u64,
    /// Jobs whose work reported failure
    pub tasks_failed: u64,
    /// Jobs dropped at shutdown before getting a slot
    pub tasks_abandoned: u64,
    /// Peak concurrent workers observed
    pub peak_concurrent: usize,
    /// Average wait time for a slot (microseconds)
    pub avg_wait_time_us: u64,
    /// Average execution time (microseconds)
    pub avg_exec_time_us: u64,
    /// Pool uptime in seconds
    pub uptime_secs: u64,
}

impl WorkerPoolStats {
    /// Calculate success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_succeeded + self.tasks_failed;
        if total == 0 {
            100.0
        } else {
            (self.tasks_succeeded as f64 / total as f64) * 100.0
        }
    }

    /// Calculate utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        (self.active_workers as f64 / self.max_workers as f64) * 100.0
    }
}
