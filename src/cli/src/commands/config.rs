//! Configuration management commands.
//!
//! Stores CLI settings in `~/.leadguard/config.toml`. Only two keys exist:
//! `api-url` (server to talk to) and `output` (default output format).

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key
        key: ConfigKey,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: ConfigKey,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Base URL of the Leadguard server
    ApiUrl,
    /// Default output format (table, json, yaml)
    Output,
}

/// Persistent CLI settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl CliConfig {
    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::ApiUrl => self.api_url.as_deref(),
            ConfigKey::Output => self.output.as_deref(),
        }
    }

    /// Validate and store a value.
    pub fn set(&mut self, key: ConfigKey, value: String) -> Result<()> {
        match key {
            ConfigKey::ApiUrl => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    anyhow::bail!("api-url must start with http:// or https://");
                }
                self.api_url = Some(value.trim_end_matches('/').to_string());
            }
            ConfigKey::Output => {
                OutputFormat::from_str(&value, true)
                    .map_err(|_| anyhow::anyhow!("output must be one of: table, json, yaml"))?;
                self.output = Some(value.to_lowercase());
            }
        }
        Ok(())
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
            .as_deref()
            .and_then(|v| OutputFormat::from_str(v, true).ok())
    }
}

fn key_name(key: ConfigKey) -> &'static str {
    match key {
        ConfigKey::ApiUrl => "api-url",
        ConfigKey::Output => "output",
    }
}

/// Return the path to the configuration file (`~/.leadguard/config.toml`).
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".leadguard").join("config.toml"))
}

fn load_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Settings from the config file; defaults when it is missing or unreadable.
pub fn load() -> CliConfig {
    config_path()
        .and_then(|path| load_from(&path))
        .unwrap_or_default()
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = load_from(&path)?;
            cfg.set(key, value)?;
            save_to(&path, &cfg)?;

            let stored = cfg.get(key).unwrap_or_default();
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("{} = {}", key_name(key), stored));
                }
                _ => output::print_item(
                    &serde_json::json!({ "key": key_name(key), "value": stored }),
                    format,
                )?,
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = load_from(&path)?;
            match (cfg.get(key), format) {
                (Some(value), OutputFormat::Table) => println!("{}", value),
                (None, OutputFormat::Table) => {
                    output::print_info(&format!("'{}' is not set", key_name(key)));
                }
                (value, _) => output::print_item(
                    &serde_json::json!({ "key": key_name(key), "value": value }),
                    format,
                )?,
            }
        }

        ConfigCommands::Show => {
            let cfg = load_from(&path)?;

            if cfg == CliConfig::default() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for key in [ConfigKey::ApiUrl, ConfigKey::Output] {
                        if let Some(value) = cfg.get(key) {
                            output::print_detail(key_name(key), value);
                        }
                    }
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info(
                    "This will reset all CLI configuration. Use --force to confirm.",
                );
                return Ok(());
            }

            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
