//! evolver MCP server binary.
//!
//! Runs the evolution loop as an MCP server over stdio. Configuration is read
//! from the working directory (evolver.toml or pyproject.toml) plus
//! `EVOLVER_*` environment variables.
//!
//! # Usage
//!
//! ```bash
//! evolver-mcp
//! RUST_LOG=evolver=debug evolver-mcp
//! ```
//!
//! Logs go to stderr; stdout carries JSON-RPC only.

use std::sync::Arc;

use anyhow::{Context, Result};
use evolver::config::EvolverConfig;
use evolver::mcp::EvolverServer;
use evolver::orchestrator::Evolver;
use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("evolver=info".parse()?))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
    let config = EvolverConfig::load(&cwd)?;
    let evolver = Evolver::from_config(&config)?;
    tracing::info!(
        state_dir = %config.state_dir.display(),
        simulator = ?config.simulator,
        "evolver MCP server starting"
    );

    let service = EvolverServer::new(Arc::new(evolver)).serve(stdio()).await?;

    // Runs until the client disconnects
    service.waiting().await?;

    Ok(())
}
