//! Configuration management.
//!
//! Settings are read from an optional file and then from `IMAGEGEN__*`
//! environment variables (`IMAGEGEN__SERVER__PORT=9000`), with every field
//! falling back to a default. Durations are written in humantime form
//! (`"30s"`, `"24h"`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::schemas::{GUIDANCE_RANGE, MAX_STEPS, MIN_STEPS, STRENGTH_RANGE};
use crate::error::{Result, ServiceError};
use crate::orchestrator::{self, ProgressBand};

const ENV_PREFIX: &str = "IMAGEGEN";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retention of finished jobs
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Generation pipeline and request defaults
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Jobs executing at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Upper bound on jobs held in memory
    #[serde(default = "default_max_tracked_jobs")]
    pub max_tracked_jobs: usize,

    /// Progress published before the backend starts
    #[serde(default = "default_progress_band_start")]
    pub progress_band_start: u8,

    /// Progress reached when the backend reports its last step
    #[serde(default = "default_progress_band_end")]
    pub progress_band_end: u8,

    /// Progress published after the backend returns
    #[serde(default = "default_post_processing_progress")]
    pub post_processing_progress: u8,

    /// How long shutdown waits for outstanding jobs
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Worker pool name
    #[serde(default = "default_pool_name")]
    pub pool_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_tracked_jobs: default_max_tracked_jobs(),
            progress_band_start: default_progress_band_start(),
            progress_band_end: default_progress_band_end(),
            post_processing_progress: default_post_processing_progress(),
            shutdown_timeout: default_shutdown_timeout(),
            pool_name: default_pool_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Finished jobs older than this are swept
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    /// Time between sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Retention age used by the final sweep at shutdown
    #[serde(default = "default_shutdown_max_age", with = "humantime_serde")]
    pub shutdown_max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: default_max_age(),
            sweep_interval: default_sweep_interval(),
            shutdown_max_age: default_shutdown_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base model identifier
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// LoRA adapter identifier
    #[serde(default = "default_lora_id")]
    pub lora_id: String,

    /// Inference device (`cpu` or `cuda`)
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_steps")]
    pub default_steps: u32,

    #[serde(default = "default_guidance")]
    pub default_guidance: f32,

    #[serde(default = "default_strength")]
    pub default_strength: f32,

    /// Output width in pixels
    #[serde(default = "default_target_size")]
    pub target_width: u32,

    /// Output height in pixels
    #[serde(default = "default_target_size")]
    pub target_height: u32,

    /// Per-step delay of the simulated backend
    #[serde(default = "default_simulated_step_delay", with = "humantime_serde")]
    pub simulated_step_delay: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            lora_id: default_lora_id(),
            device: default_device(),
            default_steps: default_steps(),
            default_guidance: default_guidance(),
            default_strength: default_strength(),
            target_width: default_target_size(),
            target_height: default_target_size(),
            simulated_step_delay: default_simulated_step_delay(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_max_concurrent_jobs() -> usize { 2 }
fn default_max_tracked_jobs() -> usize { 10_000 }
fn default_progress_band_start() -> u8 { 10 }
fn default_progress_band_end() -> u8 { 90 }
fn default_post_processing_progress() -> u8 { 95 }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(30) }
fn default_pool_name() -> String { "generation".to_string() }
fn default_max_age() -> Duration { Duration::from_secs(24 * 60 * 60) }
fn default_sweep_interval() -> Duration { Duration::from_secs(10 * 60) }
fn default_shutdown_max_age() -> Duration { Duration::from_secs(60 * 60) }
fn default_model_id() -> String { "stabilityai/stable-diffusion-xl-base-1.0".to_string() }
fn default_lora_id() -> String { "latent-consistency/lcm-lora-sdxl".to_string() }
fn default_device() -> String { "cpu".to_string() }
fn default_steps() -> u32 { crate::backend::DEFAULT_STEPS }
fn default_guidance() -> f32 { crate::backend::DEFAULT_GUIDANCE }
fn default_strength() -> f32 { crate::backend::DEFAULT_STRENGTH }
fn default_target_size() -> u32 { 1024 }
fn default_simulated_step_delay() -> Duration { Duration::from_millis(50) }

impl Config {
    /// Load configuration from the environment, layered over `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, still honoring environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let orch = &self.orchestrator;
        if orch.max_concurrent_jobs == 0 {
            return Err(ServiceError::configuration(
                "orchestrator.max_concurrent_jobs must be at least 1",
            ));
        }
        if orch.max_tracked_jobs == 0 {
            return Err(ServiceError::configuration(
                "orchestrator.max_tracked_jobs must be at least 1",
            ));
        }
        self.progress_band()?;

        if self.retention.sweep_interval.is_zero() {
            return Err(ServiceError::configuration(
                "retention.sweep_interval must be greater than zero",
            ));
        }

        let gen = &self.generation;
        if !matches!(gen.device.as_str(), "cpu" | "cuda") {
            return Err(ServiceError::configuration(format!(
                "generation.device must be 'cpu' or 'cuda', got '{}'",
                gen.device
            )));
        }
        if !(MIN_STEPS..=MAX_STEPS).contains(&gen.default_steps) {
            return Err(ServiceError::configuration(format!(
                "generation.default_steps must be between {} and {}",
                MIN_STEPS, MAX_STEPS
            )));
        }
        if !GUIDANCE_RANGE.contains(&gen.default_guidance) {
            return Err(ServiceError::configuration(format!(
                "generation.default_guidance must be between {} and {}",
                GUIDANCE_RANGE.start(),
                GUIDANCE_RANGE.end()
            )));
        }
        if !STRENGTH_RANGE.contains(&gen.default_strength) {
            return Err(ServiceError::configuration(format!(
                "generation.default_strength must be between {} and {}",
                STRENGTH_RANGE.start(),
                STRENGTH_RANGE.end()
            )));
        }
        if gen.target_width == 0 || gen.target_height == 0 {
            return Err(ServiceError::configuration(
                "generation target size must be non-zero",
            ));
        }

        Ok(())
    }

    fn progress_band(&self) -> Result<ProgressBand> {
        ProgressBand::new(
            self.orchestrator.progress_band_start,
            self.orchestrator.progress_band_end,
            self.orchestrator.post_processing_progress,
        )
    }

    /// Settings for [`crate::orchestrator::TaskOrchestrator`].
    pub fn orchestrator_config(&self) -> Result<orchestrator::OrchestratorConfig> {
        Ok(orchestrator::OrchestratorConfig {
            max_concurrent_jobs: self.orchestrator.max_concurrent_jobs,
            max_tracked_jobs: self.orchestrator.max_tracked_jobs,
            progress: self.progress_band()?,
            shutdown_timeout: self.orchestrator.shutdown_timeout,
            pool_name: self.orchestrator.pool_name.clone(),
        })
    }
}
