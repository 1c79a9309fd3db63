//! Execution backends.
//!
//! The orchestrator knows a backend only through [`ExecutionBackend`]: a
//! synchronous, possibly very slow call that turns a validated
//! [`GenerationRequest`] into an encoded image, reporting step progress through
//! an optional [`ProgressHook`]. Calls always happen on a blocking thread while
//! a worker slot is held.

mod simulated;

pub use simulated::SimulatedBackend;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of denoising steps.
pub const DEFAULT_STEPS: u32 = 20;
/// Default classifier-free guidance scale.
pub const DEFAULT_GUIDANCE: f32 = 1.5;
/// Default img2img strength.
pub const DEFAULT_STRENGTH: f32 = 0.7;

// ═══════════════════════════════════════════════════════════════════════════════
// Request
// ═══════════════════════════════════════════════════════════════════════════════

/// A validated generation request, passed through to the backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text prompt
    pub prompt: String,
    /// Base64 source image, optionally `data:image/...;base64,` prefixed
    pub init_image: String,
    /// Number of inference steps
    pub num_inference_steps: u32,
    /// Guidance scale
    pub guidance_scale: f32,
    /// How far the output may move away from the source image
    pub strength: f32,
    /// Concepts to steer away from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

impl GenerationRequest {
    /// Create a request with default generation parameters.
    pub fn new(prompt: impl Into<String>, init_image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            init_image: init_image.into(),
            num_inference_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
            strength: DEFAULT_STRENGTH,
            negative_prompt: None,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.num_inference_steps = steps;
        self
    }

    pub fn with_guidance(mut self, guidance_scale: f32) -> Self {
        self.guidance_scale = guidance_scale;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures raised by an execution backend.
///
/// These are recorded on the failed job as text; they never cross the API as
/// service errors of their own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("failed to load model {model}: {message}")]
    ModelLoad { model: String, message: String },

    #[error("image processing failed ({operation}): {message}")]
    ImageProcessing { operation: String, message: String },

    #[error("image generation failed: {0}")]
    Generation(String),

    #[error("resource exhausted ({resource}): {message}")]
    ResourceExhausted { resource: String, message: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn image_processing(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImageProcessing {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable kind, used as a log field and metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad { .. } => "model_load",
            Self::ImageProcessing { .. } => "image_processing",
            Self::Generation(_) => "generation",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Validation { .. } => "validation",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives `(current_step, total_steps)` notifications while a backend runs.
///
/// `current_step` is zero-based.
pub trait ProgressHook: Send + Sync {
    fn on_step(&self, current_step: u32, total_steps: u32);
}

impl<F> ProgressHook for F
where
    F: Fn(u32, u32) + Send + Sync,
{
    fn on_step(&self, current_step: u32, total_steps: u32) {
        self(current_step, total_steps)
    }
}

/// A synchronous image generation routine.
pub trait ExecutionBackend: Send + Sync {
    /// Run one request to completion, returning a `data:` URL on success.
    fn execute(
        &self,
        request: &GenerationRequest,
        progress: Option<&dyn ProgressHook>,
    ) -> Result<String, BackendError>;

    /// Short identifier used in logs and stats.
    fn name(&self) -> &str;

    /// Device the backend runs on (`cpu`, `cuda`, ...).
    fn device(&self) -> &str;

    /// Whether the backend can currently accept work.
    fn is_available(&self) -> bool {
        true
    }
}
