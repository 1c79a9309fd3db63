//! Mapping of backend step callbacks onto the 0-100 job progress scale.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// The slice of the progress scale the backend's own steps occupy.
///
/// A job reports `start` before the backend is invoked, moves through
/// `start..=end` as steps complete, reports `post_processing` once the backend
/// returns, and lands on 100 when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBand {
    start: u8,
    end: u8,
    post_processing: u8,
}

impl Default for ProgressBand {
    fn default() -> Self {
        Self {
            start: 10,
            end: 90,
            post_processing: 95,
        }
    }
}

impl ProgressBand {
    /// Create a band, rejecting empty or inverted ranges.
    pub fn new(start: u8, end: u8, post_processing: u8) -> Result<Self> {
        if start >= end {
            return Err(ServiceError::configuration(format!(
                "progress band start ({}) must be below its end ({})",
                start, end
            )));
        }
        if post_processing <= end || post_processing >= 100 {
            return Err(ServiceError::configuration(format!(
                "post-processing progress ({}) must lie between the band end ({}) and 100",
                post_processing, end
            )));
        }
        Ok(Self {
            start,
            end,
            post_processing,
        })
    }

    pub fn start(&self) -> u8 {
        self.start
    }

    pub fn end(&self) -> u8 {
        self.end
    }

    pub fn post_processing(&self) -> u8 {
        self.post_processing
    }

    /// Rescale a zero-based `(current_step, total_steps)` pair into the band.
    ///
    /// `total_steps == 0` is treated as one step. The value never exceeds `end`.
    pub fn scale(&self, current_step: u32, total_steps: u32) -> u8 {
        let span = u64::from(self.end - self.start);
        let total = u64::from(total_steps.max(1));
        let done = u64::from(current_step).saturating_add(1);
        let offset = (done * span / total).min(span);
        // offset <= span <= 100, so the sum fits in u8
        self.start + offset as u8
    }
}
