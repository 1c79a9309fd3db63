//! Service statistics command.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Deserialize, Serialize)]
struct StatsResponse {
    tasks: TaskCounts,
    worker_pool: PoolStats,
    system: SystemInfo,
    service_status: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct TaskCounts {
    pending: usize,
    in_progress: usize,
    completed: usize,
    failed: usize,
    total: usize,
}

#[derive(Debug, Deserialize, Serialize)]
struct PoolStats {
    name: String,
    max_workers: usize,
    active_workers: usize,
    queued: usize,
    tasks_submitted: u64,
    tasks_succeeded: u64,
    tasks_failed: u64,
    peak_concurrent: usize,
    avg_wait_time_us: u64,
    avg_exec_time_us: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct SystemInfo {
    backend: String,
    device: String,
    model_id: String,
    lora_id: String,
    default_steps: u32,
    default_guidance: f32,
    default_strength: f32,
    target_width: u32,
    target_height: u32,
}

#[derive(Debug, Serialize, Tabled)]
struct CountRow {
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Tasks")]
    count: usize,
}

fn count_rows(counts: &TaskCounts) -> Vec<CountRow> {
    vec![
        CountRow { status: "PENDING", count: counts.pending },
        CountRow { status: "IN_PROGRESS", count: counts.in_progress },
        CountRow { status: "COMPLETED", count: counts.completed },
        CountRow { status: "FAILED", count: counts.failed },
        CountRow { status: "TOTAL", count: counts.total },
    ]
}

fn millis(us: u64) -> String {
    format!("{:.1} ms", us as f64 / 1000.0)
}

pub async fn execute(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: StatsResponse = client.get("/api/v1/stats").await?;

    if format != OutputFormat::Table {
        return output::print_item(&stats, format);
    }

    output::print_header("Tasks");
    output::print_list(&count_rows(&stats.tasks), format)?;

    let pool = &stats.worker_pool;
    output::print_header(&format!("Worker Pool ({})", pool.name));
    output::print_detail("Workers", &format!("{}/{}", pool.active_workers, pool.max_workers));
    output::print_detail("Queued", &pool.queued.to_string());
    output::print_detail("Peak Concurrency", &pool.peak_concurrent.to_string());
    output::print_detail(
        "Finished",
        &format!("{} ok / {} failed of {}", pool.tasks_succeeded, pool.tasks_failed, pool.tasks_submitted),
    );
    output::print_detail("Avg Wait", &millis(pool.avg_wait_time_us));
    output::print_detail("Avg Execution", &millis(pool.avg_exec_time_us));

    let system = &stats.system;
    output::print_header("System");
    output::print_detail("Service", &stats.service_status);
    output::print_detail("Backend", &format!("{} on {}", system.backend, system.device));
    output::print_detail("Model", &system.model_id);
    output::print_detail("LoRA", &system.lora_id);
    output::print_detail(
        "Defaults",
        &format!(
            "steps={} guidance={} strength={}",
            system.default_steps, system.default_guidance, system.default_strength
        ),
    );
    output::print_detail(
        "Output Size",
        &format!("{}x{}", system.target_width, system.target_height),
    );

    Ok(())
}
