//! Job records and their retention.
//!
//! - **Job**: Identifiers, the lifecycle state machine, and read-only snapshots
//! - **Sweeper**: Periodic removal of finished jobs past their retention age

mod job;
mod sweeper;

pub use job::{JobCounts, JobId, JobRecord, JobStatus, JobView};
pub use sweeper::{RetentionSweeper, SweeperHandle};
