//! Health check command.
//!
//! Queries the health endpoint and displays backend status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Query the versioned endpoint (`/api/v1/health`)
    #[arg(long)]
    v1: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let path = if args.v1 { "/api/v1/health" } else { "/health" };
    let health: serde_json::Value = client.get_raw(path).await?;

    if format != OutputFormat::Table {
        return output::print_item(&health, format);
    }

    let field = |name: &str| {
        health
            .get(name)
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
            .unwrap_or_else(|| "unknown".to_string())
    };
    let status = field("status");

    output::print_header("Service Health");
    output::print_detail("Status", &status);
    output::print_detail("API URL", client.base_url());
    output::print_detail("Device", &field("device"));
    output::print_detail("Model Loaded", &field("model_loaded"));
    output::print_detail("Accepting Tasks", &field("accepting_tasks"));
    output::print_detail("Version", &field("version"));
    output::print_detail("Timestamp", &field("timestamp"));

    if status == "ok" {
        output::print_success("Generation backend ready");
    } else {
        output::print_error(&format!("Service status: {}", status));
    }

    Ok(())
}
