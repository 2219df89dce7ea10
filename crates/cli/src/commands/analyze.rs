//! Analyze command handler.
//!
//! Reads a policy and a set of invoice files, judges every invoice and
//! records the verdicts in the workspace ledger.

use clap::Args;
use reimburse_core::{config::AppConfig, AppError, AppResult};
use reimburse_knowledge::{
    BatchItem, BatchJob, BatchReport, ItemOutcome, JudgmentCollaborator, Ledger, LedgerConfig,
    LlmJudge, ProgressEvent, ProgressReporter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// File extensions picked up when an invoice path is a directory.
const INVOICE_EXTENSIONS: [&str; 3] = ["txt", "md", "text"];

/// Judge a batch of invoices against a policy
#[derive(Args, Debug)]
pub struct AnalyzeCommand {
    /// Policy document the invoices are judged against
    #[arg(long)]
    pub policy: PathBuf,

    /// Invoice files or directories of invoice files
    #[arg(required = true)]
    pub invoices: Vec<PathBuf>,

    /// Employee who submitted the invoices
    #[arg(short, long)]
    pub employee: String,

    /// Maximum invoices judged at once (overrides ledger config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop scheduling new invoices after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AnalyzeCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &CancellationToken) -> AppResult<()> {
        tracing::info!("Executing analyze command");
        tracing::debug!("Analyze command options: {:?}", self);

        let policy = std::fs::read_to_string(&self.policy).map_err(|e| {
            AppError::Config(format!("Failed to read policy {:?}: {}", self.policy, e))
        })?;

        let files = collect_invoices(&self.invoices)?;
        if files.is_empty() {
            return Err(AppError::Config(
                "No invoice files found in the given paths".to_string(),
            ));
        }

        let items: Vec<BatchItem> = files
            .into_iter()
            .map(|(invoice_id, path)| {
                // Unreadable files stay in the batch and fail as invalid input
                let invoice_text = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                    tracing::warn!(path = ?path, "Failed to read invoice: {}", e);
                    String::new()
                });
                BatchItem {
                    invoice_id,
                    invoice_text,
                    employee_name: self.employee.clone(),
                    date: None,
                }
            })
            .collect();

        let mut ledger_config = LedgerConfig::load(&config.workspace)?;
        if let Some(concurrency) = self.concurrency {
            ledger_config.pipeline.concurrency = concurrency;
        }
        if let Some(deadline) = self.deadline_secs {
            ledger_config.pipeline.deadline_secs = Some(deadline);
        }

        let ledger = Ledger::open_with(&config.workspace, ledger_config)?;
        let judge: Arc<dyn JudgmentCollaborator> = Arc::new(LlmJudge::from_config(config)?);

        let progress = if self.json {
            ProgressReporter::noop()
        } else {
            ProgressReporter::new(Arc::new(|event: ProgressEvent| {
                eprintln!("{}", event.format_simple())
            }))
        };

        let job = BatchJob { policy, items };
        let report = ledger.analyze(job, judge, progress, cancel).await;
        ledger.close()?;
        let report = report?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        Ok(())
    }
}

/// Expand files and directories into `(invoice_id, path)` pairs.
///
/// Files named directly are taken as-is. Directories are walked for files
/// with a known invoice extension; their ids are paths relative to the
/// directory. Results are sorted by path within each argument.
fn collect_invoices(paths: &[PathBuf]) -> AppResult<Vec<(String, PathBuf)>> {
    let mut invoices = Vec::new();

    for root in paths {
        if root.is_file() {
            invoices.push((file_id(root), root.clone()));
            continue;
        }
        if !root.is_dir() {
            return Err(AppError::NotFound(format!("Invoice path {:?} does not exist", root)));
        }

        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| INVOICE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            })
            .collect();
        found.sort();

        for path in found {
            let id = path
                .strip_prefix(root)
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| file_id(&path));
            invoices.push((id, path));
        }
    }

    Ok(invoices)
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn print_report(report: &BatchReport) {
    println!(
        "Analyzed {} of {} invoices in {:.1}s",
        report.analyzed_count(),
        report.outcomes.len(),
        report.duration_secs
    );
    println!();

    for outcome in &report.outcomes {
        match outcome {
            ItemOutcome::Analyzed { record } => {
                println!(
                    "  {}  {}  {}",
                    record.invoice_id, record.status, record.employee_name
                );
                println!("      {}", record.reason);
            }
            ItemOutcome::Failed(failure) => {
                println!(
                    "  {}  FAILED ({}, {} attempts): {}",
                    failure.invoice_id, failure.kind, failure.attempts, failure.message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_walks_directories_and_keeps_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("march");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.txt"), "Taxi").unwrap();
        std::fs::write(nested.join("a.md"), "Hotel").unwrap();
        std::fs::write(dir.path().join("receipt.pdf"), "binary").unwrap();

        let single = dir.path().join("receipt.pdf");
        let found = collect_invoices(&[dir.path().to_path_buf(), single]).unwrap();
        let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();

        assert_eq!(ids, vec!["b.txt", "march/a.md", "receipt.pdf"]);
    }

    #[test]
    fn test_collect_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let err = collect_invoices(&[dir.path().join("nope")]).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
