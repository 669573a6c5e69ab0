//! Command handlers

pub mod diagnose;
pub mod namespace;
pub mod policy;
pub mod sweep;

use crate::output::OutputFormat;
use crate::Commands;
use anyhow::Result;
use nsgov_engine::GovernanceEngine;

/// Run a command that needs a cluster connection
pub async fn handle_engine_command(
    command: Commands,
    engine: &GovernanceEngine,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    match command {
        Commands::Diagnose { name } => diagnose::handle_diagnose(engine, &name, format, verbose).await,
        Commands::Sweep { grace_days, dry_run } => sweep::handle_sweep(engine, grace_days, dry_run, format).await,
        Commands::Policies { .. } | Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
        command => namespace::handle_namespace_command(command, engine, format).await,
    }
}
