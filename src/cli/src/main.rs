//! imagegen CLI - Command-line client for the image generation service.
//!
//! Provides commands for submitting and tracking generation tasks, service
//! stats, health, and configuration management.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, generate, health, stats};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// imagegen - Asynchronous img2img generation client
#[derive(Parser)]
#[command(
    name = "imagegen",
    author = "Aezi <aezi.zhu@icloud.com>",
    version,
    about = "Client for the asynchronous img2img generation service",
    long_about = "Submit img2img tasks, follow their progress, download results and inspect the service.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "IMAGEGEN_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generation task operations
    #[command(subcommand)]
    Generate(generate::GenerateCommands),

    /// Show task counts, worker pool and system information
    Stats,

    /// Check service health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(config::load_api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Generate(cmd) => generate::execute(cmd, &client, format).await,
        Commands::Stats => stats::execute(&client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "imagegen",
            "--output",
            "json",
            "generate",
            "submit",
            "--prompt",
            "a cat",
            "--image",
            "cat.png",
            "--steps",
            "4",
            "--wait",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Generate(generate::GenerateCommands::Submit { prompt, steps, wait, .. }) => {
                assert_eq!(prompt, "a cat");
                assert_eq!(steps, Some(4));
                assert!(wait);
            }
            _ => panic!("expected generate submit"),
        }
    }
}
