//! Output formatting utilities for the Leadguard CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

/// Print a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print a warning to stderr.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// Print an informational message to stdout.
pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table. Only meaningful for table output; JSON and YAML
/// callers print the whole response with [`print_item`] instead.
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No results found.".dimmed());
        return;
    }
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string();
    println!("{}", table);
}

/// Print a single item as JSON or YAML. Table output falls back to JSON.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            let json = serde_json::to_string_pretty(item).context("Failed to serialize to JSON")?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(item).context("Failed to serialize to YAML")?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

/// Print key-value details to the terminal (non-JSON/YAML output).
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Colored circuit state label.
pub fn state_label(state: &str) -> ColoredString {
    match state {
        "closed" => "CLOSED".green().bold(),
        "open" => "OPEN".red().bold(),
        other => other.to_uppercase().yellow().bold(),
    }
}
