//! nsgov CLI
//!
//! Command-line interface for namespace lifecycle governance

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use nsgov_engine::config::GovernanceConfig;
use nsgov_engine::gateway::kubernetes::KubeGateway;
use nsgov_engine::logging::LoggingConfig;
use nsgov_common::Stage;
use nsgov_engine::{FsBackupStore, GatewayError, GovernanceEngine, GovernanceError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: $NSGOV_CONFIG, /etc/nsgov/config.toml, ./nsgov.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: String,

    /// Show every check and the full error cause chain
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Per-call cluster timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a governed namespace
    Create {
        /// Namespace name
        name: String,
        /// Owning team
        team: String,
        /// Environment label
        environment: String,
        /// Initial stage (development, testing, production)
        stage: Option<Stage>,
        /// Days until expiry (default: the stage's policy)
        retention_days: Option<u32>,
        /// Extra label (key=value), repeatable
        #[arg(short, long = "label")]
        labels: Vec<String>,
        /// Extra annotation (key=value), repeatable
        #[arg(short, long = "annotation")]
        annotations: Vec<String>,
    },
    /// Score a namespace against best practices
    Diagnose {
        /// Namespace name
        name: String,
    },
    /// Reclaim namespaces past their expiry date
    Sweep {
        /// Days past expiry before reclamation (default: from config)
        grace_days: Option<u32>,
        /// Report what would be reclaimed without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Move a namespace to another lifecycle stage
    Transition {
        /// Namespace name
        name: String,
        /// Target stage
        stage: Stage,
        /// Reason recorded on the namespace
        #[arg(default_value = "manual")]
        reason: String,
        /// Permit archived -> development/testing
        #[arg(long)]
        allow_reactivation: bool,
    },
    /// Back up and delete a namespace now
    Delete {
        /// Namespace name
        name: String,
    },
    /// List governed namespaces
    List {
        /// Only namespaces at this stage
        #[arg(short, long)]
        stage: Option<Stage>,
        /// Only namespaces owned by this team
        #[arg(short, long)]
        team: Option<String>,
    },
    /// Show a namespace's lifecycle record
    Show {
        /// Namespace name
        name: String,
    },
    /// Restart a namespace's retention period from today
    Renew {
        /// Namespace name
        name: String,
        /// New retention in days (default: the current stage's policy)
        retention_days: Option<u32>,
    },
    /// Show the per-stage policy bundles
    Policies {
        /// Only this stage
        stage: Option<Stage>,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Sample,
    /// Print the effective configuration
    Show,
    /// Check the configuration and policy overrides
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };
    let verbose = cli.verbose;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, verbose);
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = GovernanceConfig::load_with(cli.config.as_deref())?;
    if let Some(timeout) = cli.timeout {
        config.gateway.call_timeout_secs = timeout;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    // Hold the guard so buffered file logs are flushed on exit
    let _log_guard = match LoggingConfig::from(&config.logging).init() {
        Ok(guard) => guard,
        Err(e) => {
            output::print_warning(&format!("Logging disabled: {}", e));
            None
        }
    };

    let format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Policies { stage } => {
            let catalog = config.catalog()?;
            commands::policy::handle_policies_command(&catalog, stage, format)
        }
        Commands::Config { command } => commands::policy::handle_config_command(command, &config, format),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
        command => {
            if let Commands::Transition {
                allow_reactivation: true,
                ..
            } = &command
            {
                config.engine.allow_reactivation = true;
            }
            config.validate()?;

            let engine = connect(&config).await?;
            commands::handle_engine_command(command, &engine, format, cli.verbose).await
        }
    }
}

/// Build an engine against the configured cluster
async fn connect(config: &GovernanceConfig) -> Result<GovernanceEngine> {
    let gateway = KubeGateway::connect(&config.gateway)
        .await
        .context("Failed to connect to the cluster")?;
    let store = FsBackupStore::new(&config.backup.dir);
    tracing::debug!(backup_dir = %config.backup.dir.display(), "Engine ready");

    Ok(GovernanceEngine::new(config, Arc::new(gateway), Arc::new(store))?)
}

/// Map an error to the documented process exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<GovernanceError>() {
        return match err {
            GovernanceError::Validation(_)
            | GovernanceError::InvalidTransition { .. }
            | GovernanceError::ReactivationDenied { .. }
            | GovernanceError::NotFound(_) => 1,
            GovernanceError::Gateway(_)
            | GovernanceError::Conflict(_)
            | GovernanceError::Corrupt { .. }
            | GovernanceError::UnknownStage(_) => 2,
            GovernanceError::BackupRequired { .. } | GovernanceError::BackupFailure { .. } => 3,
        };
    }

    if err.downcast_ref::<GatewayError>().is_some() {
        return 2;
    }

    1
}

/// Help and version requests succeed; every usage error is a validation error
fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn report_error(err: &anyhow::Error, verbose: bool) {
    let headline = match err.downcast_ref::<GovernanceError>() {
        Some(governance) => format!("{}: {}", governance.kind(), governance),
        None => err.to_string(),
    };
    output::print_error(&headline);

    if verbose {
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
    }
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}
