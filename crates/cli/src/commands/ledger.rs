//! Ledger maintenance commands.

use clap::{Args, Subcommand};
use reimburse_core::{config::AppConfig, AppResult};
use reimburse_knowledge::config::get_config_path;
use reimburse_knowledge::{Ledger, LedgerConfig};

/// Ledger maintenance
#[derive(Args, Debug)]
pub struct LedgerCommand {
    #[command(subcommand)]
    pub action: LedgerAction,
}

#[derive(Subcommand, Debug)]
pub enum LedgerAction {
    /// Show record counts and index state
    Stats(LedgerStatsCommand),

    /// Rebuild the vector index from the stored records
    Rebuild(LedgerRebuildCommand),

    /// Delete the ledger snapshot
    Clean(LedgerCleanCommand),

    /// Write the default ledger configuration
    Init(LedgerInitCommand),
}

/// Show ledger stats
#[derive(Args, Debug)]
pub struct LedgerStatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl LedgerStatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ledger stats command");

        let ledger = Ledger::open(&config.workspace)?;
        let stats = ledger.stats()?;

        if self.json {
            let output = serde_json::json!({
                "records": stats.records,
                "approved": stats.approved,
                "declined": stats.declined,
                "needsInformation": stats.needs_information,
                "employees": stats.employees,
                "dimension": stats.dimension,
                "indexClusters": stats.index_clusters,
                "embeddingProvider": stats.embedding_provider,
                "embeddingModel": stats.embedding_model,
                "snapshotBytes": stats.snapshot_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Ledger: {:?}", config.workspace);
            println!("  Records: {}", stats.records);
            println!("    Approved: {}", stats.approved);
            println!("    Declined: {}", stats.declined);
            println!("    Needs information: {}", stats.needs_information);
            println!("  Employees: {}", stats.employees);
            println!(
                "  Embeddings: {} ({}, {} dimensions)",
                stats.embedding_provider, stats.embedding_model, stats.dimension
            );
            println!("  Index clusters: {}", stats.index_clusters);
            println!("  Snapshot size: {} bytes", stats.snapshot_bytes);
        }

        ledger.close()
    }
}

/// Rebuild the vector index
#[derive(Args, Debug)]
pub struct LedgerRebuildCommand {}

impl LedgerRebuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ledger rebuild command");

        let ledger = Ledger::open(&config.workspace)?;
        let count = ledger.rebuild()?;
        ledger.close()?;

        println!("Rebuilt index over {} records", count);
        Ok(())
    }
}

/// Delete the ledger snapshot
#[derive(Args, Debug)]
pub struct LedgerCleanCommand {}

impl LedgerCleanCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ledger clean command");

        if reimburse_knowledge::clean(&config.workspace)? {
            println!("Ledger cleaned");
        } else {
            println!("Ledger already empty");
        }
        Ok(())
    }
}

/// Write the default ledger configuration
#[derive(Args, Debug)]
pub struct LedgerInitCommand {
    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,
}

impl LedgerInitCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ledger init command");

        let path = get_config_path(&config.workspace);
        if path.exists() && !self.force {
            println!("Ledger config already exists at {:?} (use --force to overwrite)", path);
            return Ok(());
        }

        LedgerConfig::default().save(&config.workspace)?;
        println!("Wrote ledger config to {:?}", path);
        Ok(())
    }
}

impl LedgerCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            LedgerAction::Stats(cmd) => cmd.execute(config).await,
            LedgerAction::Rebuild(cmd) => cmd.execute(config).await,
            LedgerAction::Clean(cmd) => cmd.execute(config).await,
            LedgerAction::Init(cmd) => cmd.execute(config).await,
        }
    }
}
