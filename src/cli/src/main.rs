//! Leadguard CLI - operator tool for the pipeline circuit breaker.
//!
//! Reads the breaker status and performs the manual close that resumes
//! paused jobs.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{breaker, config, health};
use output::OutputFormat;

/// Leadguard - global circuit breaker for the lead pipeline
#[derive(Parser)]
#[command(
    name = "leadguard",
    version,
    about = "Leadguard - global circuit breaker for the lead pipeline",
    long_about = "Inspect the pipeline circuit breaker and close it once the failing dependency has recovered.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format (defaults to the configured `output`, then table)
    #[arg(short, long, global = true)]
    output: Option<OutputFormat>,

    /// API server URL
    #[arg(long, global = true, env = "LEADGUARD_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show circuit breaker state and paused job count
    Status,

    /// Manually close the circuit and resume paused jobs
    Close(breaker::CloseArgs),

    /// Check server health
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

    let settings = config::load();
    let format = cli
        .output
        .or_else(|| settings.output_format())
        .unwrap_or_default();
    let api_url = cli
        .api_url
        .clone()
        .or(settings.api_url)
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let client = client::ApiClient::new(&api_url)?;

    let result = match cli.command {
        Commands::Status => breaker::status(&client, format).await,
        Commands::Close(args) => breaker::close(args, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
