//! Background retention sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::TaskOrchestrator;

/// Periodically removes finished jobs older than a retention age.
pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Start sweeping `orchestrator` every `interval`, removing finished jobs
    /// created more than `max_age` ago. The first sweep happens one interval
    /// after spawning.
    pub fn spawn(
        orchestrator: Arc<TaskOrchestrator>,
        max_age: Duration,
        interval: Duration,
    ) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let swept = Arc::new(AtomicU64::new(0));
        let total = swept.clone();
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                max_age_secs = max_age.as_secs(),
                interval_secs = period.as_secs(),
                "Retention sweeper started"
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // A dropped handle also stops the sweeper.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = orchestrator.sweep(max_age);
                        total.fetch_add(removed as u64, Ordering::Relaxed);
                        tracing::debug!(removed = removed, "Retention sweep finished");
                    }
                }
            }

            tracing::info!("Retention sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
            swept,
        }
    }
}

/// Handle for controlling a running sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    swept: Arc<AtomicU64>,
}

impl SweeperHandle {
    /// Jobs removed by this sweeper so far.
    pub fn total_swept(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retention sweeper task failed");
        }
        self.swept.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationRequest, SimulatedBackend};
    use crate::jobs::JobStatus;
    use crate::orchestrator::OrchestratorConfig;

    fn orchestrator() -> Arc<TaskOrchestrator> {
        Arc::new(
            TaskOrchestrator::new(
                OrchestratorConfig::default(),
                Arc::new(SimulatedBackend::default()),
            )
            .unwrap(),
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("a cat", "aGVsbG8=").with_steps(1)
    }

    async fn wait_for_terminal(orch: &TaskOrchestrator, id: crate::jobs::JobId) {
        for _ in 0..200 {
            if orch.status(id).unwrap().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_sweeper_removes_finished_jobs() {
        let orch = orchestrator();
        let id = orch.create(request()).unwrap();
        wait_for_terminal(&orch, id).await;
        assert_eq!(orch.status(id).unwrap().status, JobStatus::Completed);

        let handle = RetentionSweeper::spawn(orch.clone(), Duration::ZERO, Duration::from_millis(10));
        for _ in 0..200 {
            if handle.total_swept() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(handle.stop().await, 1);
        assert!(orch.status(id).is_err());
    }

    #[tokio::test]
    async fn test_sweeper_keeps_young_jobs() {
        let orch = orchestrator();
        let id = orch.create(request()).unwrap();
        wait_for_terminal(&orch, id).await;

        let handle = RetentionSweeper::spawn(
            orch.clone(),
            Duration::from_secs(3600),
            Duration::from_millis(5),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(handle.stop().await, 0);
        assert!(orch.status(id).is_ok());
    }
}
