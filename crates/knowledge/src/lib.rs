//! Invoice compliance ledger.
//!
//! Judges expense invoices against a reimbursement policy, keeps the
//! structured verdicts in a record store with a vector index, and answers
//! natural-language questions by combining metadata filters with similarity
//! search.
//!
//! [`Ledger`] is the entry point: it owns the store for one workspace and
//! wires the pipeline and the query planner to it.

pub mod answer;
pub mod collaborators;
pub mod config;
pub mod embeddings;
pub mod ivf;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod similarity;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod vector_index;

// Re-export commonly used types
pub use answer::{answer_query, AnswerResponse, SourceRef};
pub use collaborators::{
    AnswerSynthesisCollaborator, DigestSynthesizer, JudgmentCollaborator, JudgmentFailure,
    LlmJudge, LlmSynthesizer, Verdict,
};
pub use config::LedgerConfig;
pub use pipeline::BatchPipeline;
pub use progress::{ProgressEvent, ProgressReporter};
pub use query::{QueryOptions, QueryOutcome, QueryPlanner, QueryPredicate};
pub use store::RecordStore;
pub use types::{
    BatchItem, BatchJob, BatchReport, FailureKind, InvoiceAnalysisRecord, ItemFailure,
    ItemOutcome, LedgerStats, RecordRef, ScoredRecord, Status,
};

use embeddings::{create_provider, EmbeddingProvider};
use reimburse_core::{AppError, AppResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The ledger of one workspace.
pub struct Ledger {
    workspace: PathBuf,
    config: LedgerConfig,
    store: Arc<RecordStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    planner: QueryPlanner,
}

impl Ledger {
    /// Open the ledger with the workspace's `ledger/config.yaml`.
    pub fn open(workspace: &Path) -> AppResult<Self> {
        let config = LedgerConfig::load(workspace)?;
        Self::open_with(workspace, config)
    }

    /// Open the ledger with an explicit configuration.
    pub fn open_with(workspace: &Path, config: LedgerConfig) -> AppResult<Self> {
        config.validate()?;

        let embedder = create_provider(&config.embedding)?;
        let store = Arc::new(RecordStore::open(
            &config,
            config::get_snapshot_path(workspace),
        )?);
        let planner = QueryPlanner::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.query.clone(),
        )?;

        tracing::info!(
            workspace = ?workspace,
            records = store.len(),
            provider = embedder.provider_name(),
            "Opened ledger"
        );

        Ok(Self {
            workspace: workspace.to_path_buf(),
            config,
            store,
            embedder,
            planner,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    /// Judge and publish every invoice of `job`, then persist the snapshot.
    pub async fn analyze(
        &self,
        job: BatchJob,
        judge: Arc<dyn JudgmentCollaborator>,
        progress: ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<BatchReport> {
        let pipeline = BatchPipeline::new(
            Arc::clone(&self.store),
            judge,
            Arc::clone(&self.embedder),
            self.config.pipeline.clone(),
        )
        .with_progress(progress);

        let report = pipeline.run(job, cancel).await?;
        if report.analyzed_count() > 0 {
            self.store.save_snapshot()?;
        }
        Ok(report)
    }

    /// Answer a question from the recorded analyses.
    pub async fn ask(
        &self,
        query: &str,
        synthesizer: &dyn AnswerSynthesisCollaborator,
        options: &QueryOptions,
    ) -> AppResult<AnswerResponse> {
        answer_query(&self.planner, synthesizer, query, options).await
    }

    /// Rebuild the vector index from the stored records.
    pub fn rebuild(&self) -> AppResult<usize> {
        let count = self.store.rebuild_index()?;
        tracing::info!(records = count, "Rebuilt vector index");
        Ok(count)
    }

    pub fn stats(&self) -> AppResult<LedgerStats> {
        let records = self.store.all()?;
        let count = |status: Status| records.iter().filter(|r| r.status == status).count();
        let employees: HashSet<String> = records
            .iter()
            .map(|r| r.employee_name.trim().to_lowercase())
            .collect();

        let snapshot_bytes = std::fs::metadata(config::get_snapshot_path(&self.workspace))
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(LedgerStats {
            records: records.len(),
            approved: count(Status::Approved),
            declined: count(Status::Declined),
            needs_information: count(Status::NeedsInformation),
            employees: employees.len(),
            dimension: self.store.dimension(),
            index_clusters: self.store.index().stats().clusters,
            embedding_provider: self.embedder.provider_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            snapshot_bytes,
        })
    }

    /// Persist and close the store.
    pub fn close(self) -> AppResult<()> {
        self.store.teardown()
    }
}

/// Delete the workspace's ledger snapshot.
///
/// Returns `false` when there was nothing to delete.
pub fn clean(workspace: &Path) -> AppResult<bool> {
    let path = config::get_snapshot_path(workspace);
    if !path.exists() {
        return Ok(false);
    }

    std::fs::remove_file(&path).map_err(|e| {
        AppError::Knowledge(format!("Failed to delete snapshot {:?}: {}", path, e))
    })?;
    tracing::info!(path = ?path, "Deleted ledger snapshot");
    Ok(true)
}
