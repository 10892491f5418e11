//! Circuit breaker commands: status read and manual close.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use colored::*;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

const BREAKER_PATH: &str = "/api/v1/circuit-breaker";
const CLOSE_PATH: &str = "/api/v1/circuit-breaker/close";

#[derive(Args)]
pub struct CloseArgs {
    /// Confirm the close; without it the command only explains what would happen
    #[arg(short, long)]
    yes: bool,
}

// ── API response types ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
struct FailureMetadata {
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct BreakerSnapshot {
    state: String,
    opened_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: FailureMetadata,
    #[serde(default)]
    degraded: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct GuardStatus {
    circuit_breaker: BreakerSnapshot,
    paused_job_count: Option<u64>,
    #[serde(default)]
    degraded: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct ResumeFailure {
    job_id: Uuid,
    reason: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct ResumeReport {
    resumed: Vec<Uuid>,
    failed: Vec<ResumeFailure>,
    attempted_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CloseOutcome {
    transitioned: bool,
    report: Option<ResumeReport>,
}

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: GuardStatus = client.get(BREAKER_PATH).await?;

    if format != OutputFormat::Table {
        return output::print_item(&status, format);
    }

    let breaker = &status.circuit_breaker;
    output::print_header("Circuit Breaker");
    output::print_detail("State", &output::state_label(&breaker.state).to_string());
    output::print_detail("Opened", &timestamp(breaker.opened_at));
    output::print_detail("Closed", &timestamp(breaker.closed_at));

    if let Some(error) = &breaker.metadata.last_error {
        output::print_detail("Last error", error);
    }
    if let Some(error_type) = &breaker.metadata.error_type {
        output::print_detail("Error type", error_type);
    }
    if let Some(failed_at) = breaker.metadata.failed_at {
        output::print_detail("Failed at", &failed_at.to_rfc3339());
    }

    output::print_detail(
        "Paused jobs",
        &status
            .paused_job_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );

    if breaker.degraded {
        output::print_warning("State store unreachable; the pipeline is failing safe (blocked)");
    } else if status.degraded {
        output::print_warning("Job store unreachable; paused job count unavailable");
    }

    Ok(())
}

pub async fn close(args: CloseArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    if !args.yes {
        output::print_info(
            "Closing the circuit resumes every paused job. Use --yes to confirm.",
        );
        return Ok(());
    }

    let outcome: CloseOutcome = client.post(CLOSE_PATH).await?;

    if format != OutputFormat::Table {
        return output::print_item(&outcome, format);
    }

    let report = match (&outcome.report, outcome.transitioned) {
        (Some(report), true) => report,
        _ => {
            output::print_info("Circuit was already closed; nothing was resumed");
            return Ok(());
        }
    };

    output::print_success("Circuit closed");
    output::print_detail("Resumed", &report.resumed.len().to_string().green().to_string());
    output::print_detail("Failed", &failed_count(report));
    output::print_detail(
        "Duration",
        &format!(
            "{} ms",
            (report.finished_at - report.attempted_at).num_milliseconds()
        ),
    );

    if !report.failed.is_empty() {
        output::print_header("Jobs that could not be resumed");
        let rows: Vec<FailureRow> = report
            .failed
            .iter()
            .map(|f| FailureRow {
                job_id: f.job_id.to_string(),
                reason: f.reason.clone(),
            })
            .collect();
        output::print_table(&rows);
    }

    Ok(())
}

fn failed_count(report: &ResumeReport) -> String {
    let count = report.failed.len().to_string();
    if report.failed.is_empty() {
        count
    } else {
        count.red().bold().to_string()
    }
}

fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
