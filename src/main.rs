use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use evidence_seeker::cli::{Args, Commands};
use evidence_seeker::config::{load_or_create_config, RunConfig};
use evidence_seeker::models::ExecutionStatus;
use evidence_seeker::run::{load_registry, RunContext};
use evidence_seeker::security::safe_error_message;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    // Load configuration, then let flags override it
    let config = load_and_process_config(&args)?;

    // Handle subcommands
    if let Some(cmd) = &args.command {
        return handle_subcommand(cmd, &config);
    }

    info!("Starting evidence_seeker run");

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    let failed = runtime.block_on(run(config))?;

    if failed > 0 {
        warn!("{} plugins failed; see the run summary for details", failed);
    }
    info!("evidence_seeker completed");
    Ok(())
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

/// Handle subcommands (init-config and list-plugins)
fn handle_subcommand(cmd: &Commands, config: &RunConfig) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            info!("Creating default configuration file at {}", path.display());
            RunConfig::create_default_config_file(path)?;
            info!("Configuration created successfully");
            Ok(())
        }
        Commands::ListPlugins => {
            let registry = load_registry(config)?;
            for plugin in registry.all() {
                println!("{}\t{}\t{}", plugin.id, plugin.category, plugin.patterns.join(", "));
            }
            for warning in registry.load_warnings() {
                warn!("{}", warning);
            }
            Ok(())
        }
    }
}

/// Load configuration, apply environment and command-line overrides
fn load_and_process_config(args: &Args) -> Result<RunConfig> {
    let mut config = load_or_create_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    Ok(config)
}

/// Executes one run; returns the number of failed plugins.
async fn run(config: RunConfig) -> Result<usize> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    let context = RunContext::open(config, cancel)?;
    let outcome = context.execute().await?;

    for result in &outcome.report.results {
        match result.status {
            ExecutionStatus::Failed => error!(
                "{}",
                safe_error_message(
                    &format!("{} failed", result.plugin_id),
                    &result.error.as_deref().unwrap_or("unknown error")
                )
            ),
            status => info!("{}: {} ({} files)", result.plugin_id, status, result.matched_files),
        }
    }
    if let Some(path) = &outcome.timeline_db {
        info!("Timeline database: {}", path.display());
    }
    if let Some(path) = &outcome.summary {
        info!("Run summary: {}", path.display());
    }
    if let Some(reason) = outcome.report.aborted {
        return Err(anyhow::Error::new(reason).context("Run aborted"));
    }

    Ok(outcome.report.count(ExecutionStatus::Failed))
}
