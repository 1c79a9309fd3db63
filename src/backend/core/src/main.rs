//! Image generation server - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use imagegen_core::{
    api::{self, AppState},
    backend::SimulatedBackend,
    config::Config,
    jobs::RetentionSweeper,
    observability,
    orchestrator::TaskOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "imagegen-server", version, about = "Asynchronous img2img generation service")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "IMAGEGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize observability
    observability::init(&config.observability)?;
    let metrics_handle = observability::init_metrics()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.generation.device,
        model_id = %config.generation.model_id,
        "Starting image generation server"
    );

    // Create backend and orchestrator
    let generation = &config.generation;
    let backend = Arc::new(
        SimulatedBackend::new(generation.model_id.clone(), generation.device.clone())
            .with_step_delay(generation.simulated_step_delay)
            .with_target_size(generation.target_width, generation.target_height),
    );

    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.orchestrator_config()?,
        backend,
    )?);
    tracing::info!("Orchestrator initialized");

    let sweeper = RetentionSweeper::spawn(
        orchestrator.clone(),
        config.retention.max_age,
        config.retention.sweep_interval,
    );

    // Create app state
    let app_state = AppState::new(orchestrator.clone(), config.generation.clone())
        .with_metrics(metrics_handle);

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    let swept = sweeper.stop().await;
    let report = orchestrator.shutdown().await;
    let final_sweep = orchestrator.sweep(config.retention.shutdown_max_age);

    tracing::info!(
        swept = swept,
        final_sweep = final_sweep,
        drained = report.drained,
        timed_out = report.timed_out,
        remaining = report.counts.total.saturating_sub(final_sweep),
        "Server shutdown complete"
    );

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
