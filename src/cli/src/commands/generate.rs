//! Image generation commands.
//!
//! Submit img2img tasks, poll them, wait for results and evict finished tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{ApiClient, ApiError};
use crate::output::{self, OutputFormat};

const GENERATE_PATH: &str = "/api/v1/generate";

fn task_path(id: Uuid) -> String {
    format!("/api/v1/generate/tasks/{}", id)
}

#[derive(Subcommand)]
pub enum GenerateCommands {
    /// Submit an img2img generation task
    Submit {
        /// Text prompt describing the desired image
        #[arg(short, long)]
        prompt: String,

        /// Source image file (PNG, JPEG or WebP)
        #[arg(short, long)]
        image: PathBuf,

        /// Number of inference steps (1-100)
        #[arg(long)]
        steps: Option<u32>,

        /// Guidance scale (0.1-20.0)
        #[arg(long)]
        guidance: Option<f32>,

        /// Denoising strength (0.0-1.0)
        #[arg(long)]
        strength: Option<f32>,

        /// Things the image should avoid
        #[arg(long)]
        negative_prompt: Option<String>,

        /// Wait for the task to finish
        #[arg(short, long)]
        wait: bool,

        /// Write the generated PNG here (implies --wait)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Poll interval while waiting
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Get task status
    Status {
        /// Task ID
        task_id: Uuid,
    },

    /// Wait for a task to finish, showing progress
    Wait {
        /// Task ID
        task_id: Uuid,

        /// Poll interval
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Write the generated PNG here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Remove a finished task from the server
    Evict {
        /// Task ID
        task_id: Uuid,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateBody {
    prompt: String,
    init_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TaskCreated {
    task_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
struct TaskStatus {
    status: String,
    progress: u8,
    #[serde(rename = "dataUrl", default, skip_serializing_if = "Option::is_none")]
    data_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TaskEvicted {
    task_id: Uuid,
    status: String,
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Read an image file and encode it as a `data:` URL.
fn encode_image(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("Image {} is empty", path.display());
    }

    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };

    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

/// Decode the image bytes carried by a `data:` URL (or bare base64).
fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let encoded = match data_url.split_once("base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => data_url,
    };
    STANDARD
        .decode(encoded.trim())
        .context("Result is not valid base64 image data")
}

fn save_result(status: &TaskStatus, out: &Path) -> Result<()> {
    let data_url = status
        .data_url
        .as_deref()
        .context("Completed task carried no image")?;
    let bytes = decode_data_url(data_url)?;
    std::fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    output::print_success(&format!("Saved {} bytes to {}", bytes.len(), out.display()));
    Ok(())
}

fn print_status(task_id: Uuid, status: &TaskStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Task: {}", task_id));
            output::print_detail("Status", &output::status_label(&status.status).to_string());
            output::print_detail("Progress", &format!("{}%", status.progress));
            if let Some(url) = &status.data_url {
                output::print_detail("Result", &format!("{} bytes (data URL)", url.len()));
            }
            Ok(())
        }
        _ => output::print_item(status, format),
    }
}

/// Poll until the task reaches a terminal state.
async fn wait_for(client: &ApiClient, task_id: Uuid, interval: Duration) -> Result<TaskStatus> {
    let pb = output::progress_bar(&format!("Task {}", task_id));

    loop {
        let status: TaskStatus = match client.get(&task_path(task_id)).await {
            Ok(status) => status,
            Err(e) => {
                pb.abandon_with_message("Failed");
                if let Some(api_err) = e.downcast_ref::<ApiError>() {
                    if api_err.is_task_failure() {
                        anyhow::bail!("{}", api_err.message);
                    }
                    if api_err.is_not_found() {
                        anyhow::bail!("Task {} not found; it may have been evicted or swept", task_id);
                    }
                }
                return Err(e);
            }
        };

        pb.set_position(u64::from(status.progress));
        pb.set_message(status.status.clone());

        match status.status.as_str() {
            "COMPLETED" => {
                pb.finish_with_message("Complete!");
                return Ok(status);
            }
            "FAILED" => {
                pb.abandon_with_message("Failed");
                anyhow::bail!("Task {} failed", task_id);
            }
            _ => {}
        }

        tokio::time::sleep(interval).await;
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: GenerateCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        GenerateCommands::Submit {
            prompt,
            image,
            steps,
            guidance,
            strength,
            negative_prompt,
            wait,
            out,
            interval_ms,
        } => {
            let body = GenerateBody {
                prompt,
                init_image: encode_image(&image)?,
                num_inference_steps: steps,
                guidance_scale: guidance,
                strength,
                negative_prompt,
            };

            let created: TaskCreated = client.post(GENERATE_PATH, &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Task submitted");
                    output::print_detail("Task ID", &created.task_id.to_string());
                }
                _ => output::print_item(&created, format)?,
            }

            if wait || out.is_some() {
                let status =
                    wait_for(client, created.task_id, Duration::from_millis(interval_ms)).await?;
                if let Some(out) = out {
                    save_result(&status, &out)?;
                }
            }
        }

        GenerateCommands::Status { task_id } => {
            let status: TaskStatus = client.get(&task_path(task_id)).await?;
            print_status(task_id, &status, format)?;
        }

        GenerateCommands::Wait {
            task_id,
            interval_ms,
            out,
        } => {
            let status = wait_for(client, task_id, Duration::from_millis(interval_ms)).await?;
            match &out {
                Some(out) => save_result(&status, out)?,
                None => print_status(task_id, &status, format)?,
            }
        }

        GenerateCommands::Evict { task_id } => {
            let evicted: TaskEvicted = client.delete(&task_path(task_id)).await?;

            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Task {} ({}) evicted",
                    evicted.task_id, evicted.status
                )),
                _ => output::print_item(&evicted, format)?,
            }
        }
    }

    Ok(())
}
