//! Scenario tests for the task orchestrator.
//!
//! Tests cover:
//! - Job creation and immediate status
//! - Progress and result/error visibility under concurrent polling
//! - The worker pool concurrency bound
//! - Backend failures and panics
//! - Retention sweeping and eviction
//! - Shutdown and forced drain

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use imagegen_core::backend::{
    BackendError, ExecutionBackend, GenerationRequest, ProgressHook, SimulatedBackend,
};
use imagegen_core::error::ErrorCode;
use imagegen_core::jobs::{JobId, JobStatus, JobView};
use imagegen_core::orchestrator::{OrchestratorConfig, TaskOrchestrator, SHUTDOWN_ERROR};

const IMAGE: &str = "aGVsbG8gd29ybGQ=";

// ============================================================================
// Test Backends
// ============================================================================

/// Blocks every execution until the gate opens (or a safety timeout passes).
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn wait(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut open = self.open.lock().unwrap();
        while !*open {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            open = self.cv.wait_timeout(open, remaining).unwrap().0;
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

#[derive(Default)]
struct GatedBackend {
    gate: Gate,
}

impl ExecutionBackend for GatedBackend {
    fn execute(
        &self,
        _request: &GenerationRequest,
        _progress: Option<&dyn ProgressHook>,
    ) -> Result<String, BackendError> {
        self.gate.wait();
        Ok("data:image/png;base64,AAAA".to_string())
    }

    fn name(&self) -> &str {
        "gated"
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

/// Records how many executions overlap.
#[derive(Default)]
struct CountingBackend {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionBackend for CountingBackend {
    fn execute(
        &self,
        _request: &GenerationRequest,
        _progress: Option<&dyn ProgressHook>,
    ) -> Result<String, BackendError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("data:image/png;base64,AAAA".to_string())
    }

    fn name(&self) -> &str {
        "counting"
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

/// Fails or panics depending on the prompt.
struct FlakyBackend;

impl ExecutionBackend for FlakyBackend {
    fn execute(
        &self,
        request: &GenerationRequest,
        _progress: Option<&dyn ProgressHook>,
    ) -> Result<String, BackendError> {
        match request.prompt.as_str() {
            "raise" => Err(BackendError::Generation("CUDA kernel crashed".to_string())),
            "panic" => panic!("pipeline exploded"),
            _ => Ok("data:image/png;base64,AAAA".to_string()),
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, IMAGE)
}

fn orchestrator_with(
    backend: Arc<dyn ExecutionBackend>,
    max_concurrent_jobs: usize,
) -> TaskOrchestrator {
    let config = OrchestratorConfig {
        max_concurrent_jobs,
        ..Default::default()
    };
    TaskOrchestrator::new(config, backend).unwrap()
}

async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

async fn wait_terminal(orch: &TaskOrchestrator, id: JobId) -> JobView {
    let finished = wait_until(
        || orch.status(id).map(|v| v.is_terminal()).unwrap_or(true),
        Duration::from_secs(10),
    )
    .await;
    assert!(finished, "job {} did not finish", id);
    orch.status(id).unwrap()
}

fn assert_consistent(view: &JobView) {
    match view.status {
        JobStatus::Completed => {
            assert!(view.result.as_deref().is_some_and(|r| !r.is_empty()));
            assert!(view.error.is_none());
        }
        JobStatus::Failed => {
            assert!(view.error.as_deref().is_some_and(|e| !e.is_empty()));
            assert!(view.result.is_none());
        }
        JobStatus::Pending | JobStatus::Running => {
            assert!(view.result.is_none());
            assert!(view.error.is_none());
        }
    }
}

// ============================================================================
// Creation & Status
// ============================================================================

#[tokio::test]
async fn test_create_then_status_is_pending() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let id = orch.create(request("a lighthouse at dusk")).unwrap();
    let view = orch.status(id).unwrap();

    assert_eq!(view.id, id);
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.progress, 0);
    assert!(view.result.is_none());
    assert!(view.error.is_none());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_status_unknown_id_not_found() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let err = orch.status(JobId::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::JobNotFound);
}

#[tokio::test]
async fn test_create_issues_unique_ids() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let ids: Vec<JobId> = (0..50)
        .map(|i| orch.create(request(&format!("prompt {}", i))).unwrap())
        .collect();
    let unique: std::collections::HashSet<_> = ids.iter().collect();

    assert_eq!(unique.len(), ids.len());
    assert_eq!(orch.counts().total, 50);

    orch.shutdown().await;
}

#[tokio::test]
async fn test_simulated_job_completes() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let id = orch.create(request("a red fox").with_steps(5)).unwrap();
    let view = wait_terminal(&orch, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert!(view
        .result
        .as_deref()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert!(view.started_at.is_some());
    assert!(view.completed_at.is_some());
}

// ============================================================================
// Progress & Visibility
// ============================================================================

#[tokio::test]
async fn test_progress_non_decreasing() {
    let backend = SimulatedBackend::default().with_step_delay(Duration::from_millis(2));
    let orch = orchestrator_with(Arc::new(backend), 1);

    let id = orch.create(request("rolling hills").with_steps(25)).unwrap();

    let mut last = 0;
    loop {
        let view = orch.status(id).unwrap();
        assert!(
            view.progress >= last,
            "progress went from {} to {}",
            last,
            view.progress
        );
        last = view.progress;
        if view.is_terminal() {
            assert_eq!(view.status, JobStatus::Completed);
            assert_eq!(view.progress, 100);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminal_fields_consistent_under_polling() {
    let backend = SimulatedBackend::default().with_step_delay(Duration::from_millis(1));
    let orch = Arc::new(orchestrator_with(Arc::new(backend), 2));

    let mut ids = Vec::new();
    for i in 0..6 {
        // Every third request carries an undecodable image and fails.
        let image = if i % 3 == 0 { "%%%" } else { IMAGE };
        ids.push(
            orch.create(GenerationRequest::new(format!("scene {}", i), image).with_steps(10))
                .unwrap(),
        );
    }
    let ids = Arc::new(ids);

    let pollers: Vec<_> = (0..4)
        .map(|_| {
            let orch = orch.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                let mut progress: HashMap<JobId, u8> = HashMap::new();
                let deadline = Instant::now() + Duration::from_secs(10);
                loop {
                    let mut done = 0;
                    for id in ids.iter() {
                        let view = orch.status(*id).unwrap();
                        assert_consistent(&view);
                        let last = progress.entry(*id).or_insert(0);
                        if view.status != JobStatus::Failed {
                            assert!(view.progress >= *last);
                        }
                        *last = view.progress;
                        if view.is_terminal() {
                            done += 1;
                        }
                    }
                    if done == ids.len() || Instant::now() > deadline {
                        return done;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for finished in futures::future::join_all(pollers).await {
        assert_eq!(finished.unwrap(), ids.len());
    }

    let counts = orch.counts();
    assert_eq!(counts.completed, 4);
    assert_eq!(counts.failed, 2);
}

// ============================================================================
// Concurrency Bound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_never_exceeds_capacity() {
    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator_with(backend.clone(), 2);

    let ids: Vec<_> = (0..8)
        .map(|i| orch.create(request(&format!("job {}", i))).unwrap())
        .collect();

    let all_done = wait_until(
        || {
            let counts = orch.counts();
            assert!(counts.running <= 2, "{} jobs running", counts.running);
            counts.completed == ids.len()
        },
        Duration::from_secs(10),
    )
    .await;

    assert!(all_done);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    assert!(
        wait_until(
            || orch.pool_stats().tasks_succeeded == 8,
            Duration::from_secs(5)
        )
        .await
    );
    assert!(orch.pool_stats().peak_concurrent <= 2);
}

#[tokio::test]
async fn test_three_jobs_on_two_workers() {
    let backend = Arc::new(GatedBackend::default());
    let orch = orchestrator_with(backend.clone(), 2);

    let ids: Vec<_> = (0..3)
        .map(|i| orch.create(request(&format!("job {}", i))).unwrap())
        .collect();

    assert!(wait_until(|| orch.counts().running == 2, Duration::from_secs(5)).await);

    // Give the third job every chance to sneak into a slot.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let counts = orch.counts();
    assert_eq!(counts.running, 2);
    assert_eq!(counts.pending, 1);

    backend.gate.release();

    for id in ids {
        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Completed);
    }
    assert_eq!(orch.counts().completed, 3);
}

// ============================================================================
// Backend Failures
// ============================================================================

#[tokio::test]
async fn test_backend_error_fails_job() {
    let orch = orchestrator_with(Arc::new(FlakyBackend), 2);

    let id = orch.create(request("raise")).unwrap();
    let view = wait_terminal(&orch, id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.result.is_none());
    let error = view.error.as_deref().unwrap();
    assert!(error.contains("task execution failed"));
    assert!(error.contains("CUDA kernel crashed"));
}

#[tokio::test]
async fn test_backend_panic_fails_job() {
    let orch = orchestrator_with(Arc::new(FlakyBackend), 2);

    let id = orch.create(request("panic")).unwrap();
    let view = wait_terminal(&orch, id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.as_deref().unwrap().contains("pipeline exploded"));
}

#[tokio::test]
async fn test_orchestrator_healthy_after_failures() {
    let orch = orchestrator_with(Arc::new(FlakyBackend), 2);

    let failed = orch.create(request("raise")).unwrap();
    let panicked = orch.create(request("panic")).unwrap();
    wait_terminal(&orch, failed).await;
    wait_terminal(&orch, panicked).await;

    assert!(orch.is_accepting());
    let id = orch.create(request("a calm sea")).unwrap();
    let view = wait_terminal(&orch, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(
        wait_until(
            || orch.pool_stats().available_permits == 2,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(orch.pool_stats().tasks_failed, 2);
}

// ============================================================================
// Retention & Eviction
// ============================================================================

#[tokio::test]
async fn test_sweep_zero_keeps_unfinished_job() {
    let backend = Arc::new(GatedBackend::default());
    let orch = orchestrator_with(backend.clone(), 1);

    let running = orch.create(request("first")).unwrap();
    let pending = orch.create(request("second")).unwrap();

    assert_eq!(orch.sweep(Duration::ZERO), 0);
    assert!(wait_until(|| orch.counts().running == 1, Duration::from_secs(5)).await);
    assert_eq!(orch.sweep(Duration::ZERO), 0);

    assert!(orch.status(running).is_ok());
    assert!(orch.status(pending).is_ok());

    backend.gate.release();
    orch.shutdown().await;
}

#[tokio::test]
async fn test_sweep_before_cutoff_removes_terminal_jobs() {
    let backend = Arc::new(GatedBackend::default());
    let orch = orchestrator_with(backend.clone(), 1);

    let first = orch.create(request("first")).unwrap();
    let second = orch.create(request("second")).unwrap();
    backend.gate.release();
    wait_terminal(&orch, first).await;
    wait_terminal(&orch, second).await;
    let held = orch.create(request("third")).unwrap();

    assert_eq!(orch.sweep(Duration::from_secs(3600)), 0);

    // Every job was created before this cutoff; only the finished ones go.
    let cutoff = Utc::now() + chrono::Duration::seconds(60);
    let removed = orch.sweep_before(cutoff);
    let held_finished = orch.status(held).map(|v| v.is_terminal()).unwrap_or(true);
    assert!(removed == 2 || (removed == 3 && held_finished));

    assert_eq!(orch.status(first).unwrap_err().code(), ErrorCode::JobNotFound);
    assert_eq!(orch.status(second).unwrap_err().code(), ErrorCode::JobNotFound);
}

#[tokio::test]
async fn test_sweep_respects_max_age() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let old = orch.create(request("old")).unwrap();
    wait_terminal(&orch, old).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let young = orch.create(request("young")).unwrap();
    wait_terminal(&orch, young).await;

    assert_eq!(orch.sweep(Duration::from_millis(150)), 1);
    assert!(orch.status(old).is_err());
    assert_eq!(orch.status(young).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let orch = orchestrator_with(Arc::new(SimulatedBackend::default()), 2);

    let id = orch.create(request("once")).unwrap();
    wait_terminal(&orch, id).await;
    let keep = orch.create(request("kept")).unwrap();
    wait_terminal(&orch, keep).await;

    let cutoff = orch.status(keep).unwrap().created_at;
    assert_eq!(orch.sweep_before(cutoff), 1);
    for _ in 0..3 {
        assert_eq!(orch.sweep_before(cutoff), 0);
    }
    assert_eq!(orch.status(id).unwrap_err().code(), ErrorCode::JobNotFound);
    assert!(orch.status(keep).is_ok());
}

#[tokio::test]
async fn test_evict_requires_terminal_job() {
    let backend = Arc::new(GatedBackend::default());
    let orch = orchestrator_with(backend.clone(), 1);

    let id = orch.create(request("held")).unwrap();
    let err = orch.evict(id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    assert_eq!(err.http_status(), axum::http::StatusCode::CONFLICT);

    backend.gate.release();
    wait_terminal(&orch, id).await;

    let view = orch.evict(id).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(orch.status(id).unwrap_err().code(), ErrorCode::JobNotFound);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_waits_for_outstanding_jobs() {
    let backend = SimulatedBackend::default().with_step_delay(Duration::from_millis(1));
    let orch = orchestrator_with(Arc::new(backend), 1);

    let ids: Vec<_> = (0..3)
        .map(|i| orch.create(request(&format!("job {}", i)).with_steps(5)).unwrap())
        .collect();

    let report = orch.shutdown().await;
    assert!(!report.timed_out);
    assert_eq!(report.drained, 0);
    assert_eq!(report.counts.completed, 3);

    for id in ids {
        assert_eq!(orch.status(id).unwrap().status, JobStatus::Completed);
    }

    let err = orch.create(request("late")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
}

#[tokio::test]
async fn test_shutdown_timeout_drains_unfinished_jobs() {
    let backend = Arc::new(GatedBackend::default());
    let config = OrchestratorConfig {
        max_concurrent_jobs: 1,
        shutdown_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(config, backend.clone()).unwrap();

    let running = orch.create(request("stuck")).unwrap();
    let queued = orch.create(request("waiting")).unwrap();
    assert!(wait_until(|| orch.counts().running == 1, Duration::from_secs(5)).await);

    let report = orch.shutdown().await;
    assert!(report.timed_out);
    assert_eq!(report.drained, 2);
    assert_eq!(report.counts.failed, 2);

    for id in [running, queued] {
        let view = orch.status(id).unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some(SHUTDOWN_ERROR));
        assert!(view.result.is_none());
    }

    // The stuck backend call finishing late must not resurrect the job.
    backend.gate.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = orch.status(running).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.result.is_none());
}
