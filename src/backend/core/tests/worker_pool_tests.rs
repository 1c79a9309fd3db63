//! Tests for the bounded worker pool.
//!
//! Tests cover:
//! - Pool creation and configuration
//! - Slot accounting and the concurrency limit
//! - FIFO-ish dispatch of queued work
//! - Statistics tracking
//! - Shutdown, including timeouts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use imagegen_core::error::ErrorCode;
use imagegen_core::jobs::JobId;
use imagegen_core::orchestrator::{WorkOutcome, WorkerPool, WorkerPoolConfig, WorkerPoolStats};

fn pool(max_workers: usize) -> WorkerPool {
    WorkerPool::new(
        WorkerPoolConfig::default()
            .with_max_workers(max_workers)
            .with_name("test-pool"),
    )
    .unwrap()
}

async fn settle(pool: &WorkerPool, submitted: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let stats = pool.stats();
        if stats.tasks_succeeded + stats.tasks_failed == submitted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Pool Configuration Tests
// ============================================================================

#[test]
fn test_pool_config_default() {
    let config = WorkerPoolConfig::default();

    assert_eq!(config.max_workers, 2);
    assert_eq!(config.name, "generation");
}

#[test]
fn test_pool_config_builders() {
    let config = WorkerPoolConfig::default()
        .with_max_workers(8)
        .with_name(String::from("gpu"));

    assert_eq!(config.max_workers, 8);
    assert_eq!(config.name, "gpu");
}

#[test]
fn test_pool_requires_runtime() {
    let err = WorkerPool::new(WorkerPoolConfig::default()).err().unwrap();
    assert_eq!(err.code(), ErrorCode::InternalError);
}

#[tokio::test]
async fn test_pool_rejects_zero_workers() {
    let err = WorkerPool::new(WorkerPoolConfig::default().with_max_workers(0))
        .err()
        .unwrap();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

// ============================================================================
// Execution Tests
// ============================================================================

#[tokio::test]
async fn test_submit_runs_work() {
    let pool = pool(2);
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let ran = ran.clone();
        pool.submit(JobId::new(), move || {
            ran.fetch_add(1, Ordering::SeqCst);
            WorkOutcome::Succeeded
        })
        .unwrap();
    }

    assert!(pool.shutdown(Duration::from_secs(5)).await);
    assert_eq!(ran.load(Ordering::SeqCst), 5);

    let stats = pool.stats();
    assert_eq!(stats.tasks_submitted, 5);
    assert_eq!(stats.tasks_succeeded, 5);
    assert_eq!(stats.tasks_failed, 0);
    assert_eq!(stats.available_permits, 2);
}

#[tokio::test]
async fn test_submit_does_not_block_caller() {
    let pool = pool(1);

    let started = Instant::now();
    for _ in 0..10 {
        pool.submit(JobId::new(), || {
            std::thread::sleep(Duration::from_millis(20));
            WorkOutcome::Succeeded
        })
        .unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(100));

    assert!(pool.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_respected() {
    let pool = pool(3);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..12 {
        let current = current.clone();
        let peak = peak.clone();
        pool.submit(JobId::new(), move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            current.fetch_sub(1, Ordering::SeqCst);
            WorkOutcome::Succeeded
        })
        .unwrap();
    }

    assert!(pool.shutdown(Duration::from_secs(10)).await);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.stats().peak_concurrent <= 3);
    assert_eq!(pool.stats().tasks_succeeded, 12);
}

#[tokio::test]
async fn test_single_worker_runs_in_submission_order() {
    let pool = pool(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let order = order.clone();
        pool.submit(JobId::new(), move || {
            order.lock().unwrap().push(i);
            WorkOutcome::Succeeded
        })
        .unwrap();
    }

    assert!(pool.shutdown(Duration::from_secs(5)).await);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_and_panicking_work_counted() {
    let pool = pool(2);

    pool.submit(JobId::new(), || WorkOutcome::Failed).unwrap();
    pool.submit(JobId::new(), || panic!("worker blew up")).unwrap();
    pool.submit(JobId::new(), || WorkOutcome::Succeeded).unwrap();

    assert!(pool.shutdown(Duration::from_secs(5)).await);

    let stats = pool.stats();
    assert_eq!(stats.tasks_succeeded, 1);
    assert_eq!(stats.tasks_failed, 2);
    assert_eq!(stats.available_permits, 2);
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test]
async fn test_capacity_reporting() {
    let pool = pool(1);
    let (tx, rx) = std::sync::mpsc::channel::<()>();

    pool.submit(JobId::new(), move || {
        let _ = rx.recv_timeout(Duration::from_secs(5));
        WorkOutcome::Succeeded
    })
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !pool.is_at_capacity() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(pool.is_at_capacity());
    assert_eq!(pool.active_workers(), 1);

    tx.send(()).unwrap();
    settle(&pool, 1).await;
    assert_eq!(pool.stats().tasks_succeeded, 1);
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_submit_after_shutdown_rejected() {
    let pool = pool(2);

    assert!(pool.shutdown(Duration::from_secs(1)).await);
    assert!(pool.is_closed());

    let err = pool
        .submit(JobId::new(), || WorkOutcome::Succeeded)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
}

#[tokio::test]
async fn test_shutdown_timeout_abandons_queued_work() {
    let pool = pool(1);
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let ran_queued = Arc::new(AtomicUsize::new(0));

    pool.submit(JobId::new(), move || {
        let _ = rx.recv_timeout(Duration::from_secs(5));
        WorkOutcome::Succeeded
    })
    .unwrap();
    let ran = ran_queued.clone();
    pool.submit(JobId::new(), move || {
        ran.fetch_add(1, Ordering::SeqCst);
        WorkOutcome::Succeeded
    })
    .unwrap();

    assert!(!pool.shutdown(Duration::from_millis(50)).await);

    tx.send(()).unwrap();
    settle(&pool, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = pool.stats();
    assert_eq!(ran_queued.load(Ordering::SeqCst), 0);
    assert_eq!(stats.tasks_abandoned, 1);
    assert_eq!(stats.tasks_succeeded, 1);
}

// ============================================================================
// Statistics Tests
// ============================================================================

#[tokio::test]
async fn test_stats_initial() {
    let pool = pool(4);
    let stats = pool.stats();

    assert_eq!(stats.name, "test-pool");
    assert_eq!(stats.max_workers, 4);
    assert_eq!(stats.available_permits, 4);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.tasks_submitted, 0);
    assert_eq!(stats.avg_wait_time_us, 0);
    assert_eq!(stats.avg_exec_time_us, 0);
}

fn stats_with(succeeded: u64, failed: u64, active: usize, max: usize) -> WorkerPoolStats {
    WorkerPoolStats {
        name: "stats".to_string(),
        max_workers: max,
        available_permits: max - active,
        active_workers: active,
        queued: 0,
        tasks_submitted: succeeded + failed,
        tasks_succeeded: succeeded,
        tasks_failed: failed,
        tasks_abandoned: 0,
        peak_concurrent: active,
        avg_wait_time_us: 0,
        avg_exec_time_us: 0,
        uptime_secs: 0,
    }
}

#[test]
fn test_stats_success_rate() {
    assert_eq!(stats_with(0, 0, 0, 2).success_rate(), 100.0);
    assert_eq!(stats_with(3, 1, 0, 2).success_rate(), 75.0);
    assert_eq!(stats_with(0, 4, 0, 2).success_rate(), 0.0);
}

#[test]
fn test_stats_utilization() {
    assert_eq!(stats_with(0, 0, 0, 4).utilization(), 0.0);
    assert_eq!(stats_with(0, 0, 1, 4).utilization(), 25.0);
    assert_eq!(stats_with(0, 0, 4, 4).utilization(), 100.0);
}

#[test]
fn test_stats_serialization() {
    let json = serde_json::to_value(stats_with(2, 1, 1, 2)).unwrap();

    assert_eq!(json["name"], "stats");
    assert_eq!(json["tasks_succeeded"], 2);
    assert_eq!(json["tasks_failed"], 1);
    assert_eq!(json["active_workers"], 1);
}
