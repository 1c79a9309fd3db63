//! Request and response bodies for the HTTP API.

use std::ops::RangeInclusive;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::backend::GenerationRequest;
use crate::config::GenerationConfig;
use crate::error::{Result, ServiceError};
use crate::jobs::{JobCounts, JobId, JobStatus, JobView};
use crate::orchestrator::WorkerPoolStats;

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const GUIDANCE_RANGE: RangeInclusive<f32> = 0.1..=20.0;
pub const STRENGTH_RANGE: RangeInclusive<f32> = 0.0..=1.0;

// ═══════════════════════════════════════════════════════════════════════════════
// Generation Requests
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of `POST /api/v1/generate`.
///
/// Omitted parameters are filled from the service's generation defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub init_image: String,
    pub num_inference_steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub strength: Option<f32>,
    pub negative_prompt: Option<String>,
}

impl GenerateRequest {
    /// Validate the request and resolve defaults into a backend request.
    pub fn into_generation_request(self, defaults: &GenerationConfig) -> Result<GenerationRequest> {
        if self.prompt.trim().is_empty() {
            return Err(ServiceError::invalid_field("prompt", "must not be empty"));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ServiceError::invalid_field(
                "prompt",
                format!("must be at most {} characters", MAX_PROMPT_CHARS),
            ));
        }

        validate_image(&self.init_image)?;

        let steps = self.num_inference_steps.unwrap_or(defaults.default_steps);
        if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
            return Err(ServiceError::invalid_field(
                "num_inference_steps",
                format!("must be between {} and {}", MIN_STEPS, MAX_STEPS),
            ));
        }

        let guidance_scale = self.guidance_scale.unwrap_or(defaults.default_guidance);
        if !GUIDANCE_RANGE.contains(&guidance_scale) {
            return Err(ServiceError::invalid_field(
                "guidance_scale",
                format!(
                    "must be between {} and {}",
                    GUIDANCE_RANGE.start(),
                    GUIDANCE_RANGE.end()
                ),
            ));
        }

        let strength = self.strength.unwrap_or(defaults.default_strength);
        if !STRENGTH_RANGE.contains(&strength) {
            return Err(ServiceError::invalid_field(
                "strength",
                format!(
                    "must be between {} and {}",
                    STRENGTH_RANGE.start(),
                    STRENGTH_RANGE.end()
                ),
            ));
        }

        if let Some(negative) = &self.negative_prompt {
            if negative.chars().count() > MAX_PROMPT_CHARS {
                return Err(ServiceError::invalid_field(
                    "negative_prompt",
                    format!("must be at most {} characters", MAX_PROMPT_CHARS),
                ));
            }
        }

        Ok(GenerationRequest {
            prompt: self.prompt,
            init_image: self.init_image,
            num_inference_steps: steps,
            guidance_scale,
            strength,
            negative_prompt: self.negative_prompt.filter(|n| !n.trim().is_empty()),
        })
    }
}

fn validate_image(init_image: &str) -> Result<()> {
    if init_image.trim().is_empty() {
        return Err(ServiceError::invalid_field("init_image", "is required"));
    }

    let encoded = if init_image.starts_with("data:") {
        match init_image.split_once(";base64,") {
            Some((media_type, data)) if media_type.starts_with("data:image/") => data,
            _ => {
                return Err(ServiceError::invalid_field(
                    "init_image",
                    "data URL must be of the form data:image/<type>;base64,<data>",
                ))
            }
        }
    } else {
        init_image
    };

    match STANDARD.decode(encoded.trim()) {
        Ok(bytes) if !bytes.is_empty() => Ok(()),
        Ok(_) => Err(ServiceError::invalid_field("init_image", "image data is empty")),
        Err(_) => Err(ServiceError::invalid_field(
            "init_image",
            "invalid base64 image data",
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════════════

/// Body returned when a task is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreatedResponse {
    pub task_id: JobId,
}

/// Body returned while polling a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(rename = "dataUrl", skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

impl From<&JobView> for TaskStatusResponse {
    fn from(view: &JobView) -> Self {
        Self {
            status: view.status,
            progress: view.progress,
            data_url: view.result.as_deref().map(str::to_string),
        }
    }
}

/// Body returned when a finished task is evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvictedResponse {
    pub task_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when the backend can take work, `error` otherwise
    pub status: String,
    pub device: String,
    pub model_loaded: bool,
    pub accepting_tasks: bool,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub backend: String,
    pub device: String,
    pub model_id: String,
    pub lora_id: String,
    pub default_steps: u32,
    pub default_guidance: f32,
    pub default_strength: f32,
    pub target_width: u32,
    pub target_height: u32,
}

impl SystemInfo {
    pub fn new(backend: &str, device: &str, generation: &GenerationConfig) -> Self {
        Self {
            backend: backend.to_string(),
            device: device.to_string(),
            model_id: generation.model_id.clone(),
            lora_id: generation.lora_id.clone(),
            default_steps: generation.default_steps,
            default_guidance: generation.default_guidance,
            default_strength: generation.default_strength,
            target_width: generation.target_width,
            target_height: generation.target_height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub tasks: JobCounts,
    pub worker_pool: WorkerPoolStats,
    pub system: SystemInfo,
    pub service_status: String,
}
