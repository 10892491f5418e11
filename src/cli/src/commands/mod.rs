//! CLI subcommands.

pub mod breaker;
pub mod config;
pub mod health;
