//! Health check command.
//!
//! Queries `/health` (liveness) and, with `--ready`, `/health/ready` which
//! checks the breaker state store and the job store.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Also run the readiness checks against both stores
    #[arg(short, long)]
    ready: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let path = if args.ready { "/health/ready" } else { "/health" };
    let (code, health) = client.get_raw(path).await?;

    if format != OutputFormat::Table {
        return output::print_item(&health, format);
    }

    let status = health
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    output::print_header("Server Health");
    output::print_detail("Status", status);
    output::print_detail("API URL", client.base_url());

    if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
        output::print_detail("Version", version);
    }

    if let Some(checks) = health.get("checks").and_then(|v| v.as_object()) {
        output::print_header("Checks");
        for (name, result) in checks {
            output::print_detail(name, result.as_str().unwrap_or("?"));
        }
    }

    if (200..300).contains(&code) {
        output::print_success("Server operational");
    } else {
        output::print_error(&format!("Server status: {} (HTTP {})", status, code));
    }

    Ok(())
}
