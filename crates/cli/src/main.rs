//! Reimburse CLI
//!
//! Main entry point for the reimburse command-line tool.
//! Judges expense invoices against a policy and answers questions about the
//! recorded verdicts.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AnalyzeCommand, AskCommand, LedgerCommand, PromptsCommand};
use reimburse_core::config::{AppConfig, CliOverrides};
use reimburse_core::logging::{self, LogOptions};
use reimburse_core::AppResult;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Reimburse - invoice compliance ledger
#[derive(Parser, Debug)]
#[command(name = "reimburse")]
#[command(about = "Judge expense invoices against a policy and query the verdicts", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "REIMBURSE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "REIMBURSE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// LLM provider (ollama)
    #[arg(short, long, global = true, env = "REIMBURSE_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "REIMBURSE_MODEL")]
    model: Option<String>,

    /// Provider endpoint
    #[arg(long, global = true, env = "REIMBURSE_ENDPOINT")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Judge a batch of invoices against a policy
    Analyze(AnalyzeCommand),

    /// Ask a question about the recorded verdicts
    Ask(AskCommand),

    /// Ledger maintenance (stats, rebuild, clean, init)
    Ledger(LedgerCommand),

    /// List available prompts
    Prompts(PromptsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment, then apply CLI overrides
    let config = AppConfig::load()?.with_overrides(CliOverrides {
        workspace: cli.workspace,
        config_file: cli.config,
        provider: cli.provider,
        model: cli.model,
        endpoint: cli.endpoint,
        log_level: cli.log_level,
        verbose: cli.verbose,
        no_color: cli.no_color,
        log_json: cli.log_json,
    });

    logging::init_logging(&LogOptions {
        level: config.log_level.as_deref(),
        no_color: config.no_color,
        json: config.log_json,
    })?;

    tracing::info!("Reimburse CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.provider);
    tracing::debug!("Model: {}", config.model);

    config.validate()?;
    config.ensure_state_dir()?;

    // Ctrl-C stops scheduling new work; finished items are still reported
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let command_name = match &cli.command {
        Commands::Analyze(_) => "analyze",
        Commands::Ask(_) => "ask",
        Commands::Ledger(_) => "ledger",
        Commands::Prompts(_) => "prompts",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Analyze(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Ledger(cmd) => cmd.execute(&config).await,
        Commands::Prompts(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
