//! Job records and the job state machine.
//!
//! This module provides the data tracked for every generation request:
//!
//! - **JobId**: Opaque identifier handed back to clients
//! - **JobStatus**: Lifecycle state with the allowed transitions
//! - **JobRecord**: The mutable record owned by the orchestrator's job table
//! - **JobView**: Immutable snapshot returned by status queries
//! - **JobCounts**: Per-state totals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::GenerationRequest;
use crate::error::{Result, ServiceError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a job.
///
/// `Pending -> Running -> {Completed, Failed}`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Registered and waiting for a worker slot
    Pending,
    /// Executing inside a worker slot
    #[serde(rename = "IN_PROGRESS", alias = "RUNNING")]
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether the regular execution path may move from `self` to `target`.
    ///
    /// `Pending -> Failed` is deliberately absent; only [`JobRecord::abandon`]
    /// performs it.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// The mutable record for one job.
///
/// Only the orchestrator holds records; every mutation happens under its job
/// table lock, so a reader never observes a half-applied transition.
#[derive(Debug, Clone)]
pub struct JobRecord {
    id: JobId,
    payload: Arc<GenerationRequest>,
    status: JobStatus,
    progress: u8,
    result: Option<Arc<str>>,
    error: Option<Arc<str>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a pending record with zero progress.
    pub fn new(id: JobId, payload: GenerationRequest) -> Self {
        Self {
            id,
            payload: Arc::new(payload),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn payload(&self) -> &Arc<GenerationRequest> {
        &self.payload
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, target: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(ServiceError::invalid_state_transition(
                self.id,
                self.status,
                target,
            ));
        }
        self.status = target;
        Ok(())
    }

    /// Move a pending job into execution.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.progress = 0;
        Ok(())
    }

    /// Record a progress value for a running job.
    ///
    /// Values are clamped to 100 and never lower the current progress.
    /// Returns `false` when the job is not running or nothing changed.
    pub fn report_progress(&mut self, value: u8) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let value = value.min(100);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        true
    }

    /// Finish a running job with its result.
    ///
    /// An empty result is refused with `InvariantViolation` and leaves the
    /// record untouched so the caller can fail it instead.
    pub fn complete(&mut self, result: impl Into<Arc<str>>) -> Result<()> {
        let result = result.into();
        if !self.status.can_transition_to(JobStatus::Completed) {
            return Err(ServiceError::invalid_state_transition(
                self.id,
                self.status,
                JobStatus::Completed,
            ));
        }
        if result.trim().is_empty() {
            return Err(ServiceError::invariant_violation(
                self.id,
                "backend returned an empty result",
            ));
        }
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Finish a running job with an error. Progress keeps its last value.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(non_empty_error(error.into()));
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Fail a job that never got to finish, whether it is pending or running.
    ///
    /// Used only when the orchestrator gives up on outstanding work at shutdown.
    pub fn abandon(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(ServiceError::invalid_state_transition(
                self.id,
                self.status,
                JobStatus::Failed,
            ));
        }
        self.status = JobStatus::Failed;
        self.error = Some(non_empty_error(reason.into()));
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Take an immutable snapshot of this record.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

fn non_empty_error(error: String) -> Arc<str> {
    if error.trim().is_empty() {
        Arc::from("unknown error")
    } else {
        Arc::from(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only snapshot of a job returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Arc<str>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Number of tracked jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    #[serde(rename = "in_progress")]
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl JobCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }

    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }
}

impl FromIterator<JobStatus> for JobCounts {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}
