//! Observability: Logging and Metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Histogram buckets for job durations, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

/// Install the Prometheus recorder and describe every service metric.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)?
        .install_recorder()?;

    metrics::register_metrics();
    tracing::info!("Metrics recorder installed");
    Ok(handle)
}

/// Metric names and descriptions.
pub mod metrics {
    use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    pub const JOBS_CREATED: &str = "imagegen_jobs_created_total";
    pub const JOBS_COMPLETED: &str = "imagegen_jobs_completed_total";
    pub const JOBS_FAILED: &str = "imagegen_jobs_failed_total";
    pub const JOBS_SWEPT: &str = "imagegen_jobs_swept_total";
    pub const ERRORS: &str = "imagegen_errors_total";
    pub const JOBS_RUNNING: &str = "imagegen_jobs_running";
    pub const JOB_DURATION: &str = "imagegen_job_duration_seconds";
    pub const QUEUE_WAIT: &str = "imagegen_job_queue_wait_seconds";

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(JOBS_CREATED, "Total number of generation jobs accepted");
        describe_counter!(JOBS_COMPLETED, "Total number of jobs that produced an image");
        describe_counter!(JOBS_FAILED, "Total number of jobs that ended in failure");
        describe_counter!(JOBS_SWEPT, "Total number of finished jobs removed by retention");
        describe_counter!(ERRORS, "Total number of service errors by code");

        // Gauges
        describe_gauge!(JOBS_RUNNING, "Number of jobs currently holding a worker slot");

        // Histograms
        describe_histogram!(JOB_DURATION, Unit::Seconds, "Time a job spent executing");
        describe_histogram!(QUEUE_WAIT, Unit::Seconds, "Time a job waited for a worker slot");
    }
}
