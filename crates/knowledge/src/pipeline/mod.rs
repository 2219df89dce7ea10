//! Concurrent batch analysis.
//!
//! Each invoice is judged, embedded and published independently. At most
//! `pipeline.concurrency` invoices are in flight; an item that fails only
//! produces a failure outcome for itself. Workers report `(index, outcome)`
//! over a channel and the collector writes each into its slot, so the
//! report always has one outcome per input item in input order.
//!
//! Cancellation (caller token or `pipeline.deadline_secs`) stops scheduling
//! and interrupts judgment calls. Items that never started are reported as
//! `Cancelled`.

pub mod retry;

use crate::collaborators::{JudgmentCollaborator, JudgmentFailure, Verdict};
use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::progress::ProgressReporter;
use crate::store::RecordStore;
use crate::types::{
    BatchItem, BatchJob, BatchReport, FailureKind, InvoiceAnalysisRecord, ItemFailure, ItemOutcome,
};
use reimburse_core::{AppError, AppResult};
use retry::{judge_with_retry, RetryError, RetryPolicy};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Build the normalized text an analysis is embedded from.
///
/// Whitespace runs collapse to single spaces and the result is cut to
/// `max_chars` characters.
pub fn build_excerpt(verdict: &Verdict, invoice_text: &str, max_chars: usize) -> String {
    let raw = format!(
        "Employee: {} Status: {} Reason: {} Invoice: {}",
        verdict.employee_name, verdict.status, verdict.reason, invoice_text
    );
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

fn failure(item: &BatchItem, kind: FailureKind, message: impl Into<String>, attempts: u32) -> ItemOutcome {
    ItemOutcome::Failed(ItemFailure {
        invoice_id: item.invoice_id.clone(),
        kind,
        message: message.into(),
        attempts,
    })
}

/// State shared by every worker of one batch.
struct Worker {
    store: Arc<RecordStore>,
    judge: Arc<dyn JudgmentCollaborator>,
    embedder: Arc<dyn EmbeddingProvider>,
    policy_text: String,
    retry: RetryPolicy,
    halt: CancellationToken,
    progress: ProgressReporter,
}

impl Worker {
    async fn process(&self, item: BatchItem) -> ItemOutcome {
        let outcome = self.analyze(&item).await;
        match &outcome {
            ItemOutcome::Analyzed { record } => {
                self.progress.publish(&item.invoice_id, record.status.as_str())
            }
            ItemOutcome::Failed(f) if f.kind == FailureKind::Cancelled => {
                self.progress.cancelled(&item.invoice_id)
            }
            ItemOutcome::Failed(f) => {
                tracing::warn!(invoice = %f.invoice_id, kind = %f.kind, "Invoice failed: {}", f.message);
                self.progress.failed(&item.invoice_id, &f.kind.to_string())
            }
        }
        outcome
    }

    async fn analyze(&self, item: &BatchItem) -> ItemOutcome {
        if item.invoice_text.trim().is_empty() {
            return failure(item, FailureKind::InvalidInput, "invoice text is empty", 0);
        }

        let (verdict, attempts) = match judge_with_retry(
            self.judge.as_ref(),
            &self.retry,
            &self.halt,
            &self.progress,
            &self.policy_text,
            item,
        )
        .await
        {
            Ok(judged) => judged,
            Err(RetryError::Cancelled { attempts }) => {
                return failure(item, FailureKind::Cancelled, "cancelled during judgment", attempts)
            }
            Err(RetryError::Failed { failure: f, attempts }) => {
                let kind = match f {
                    JudgmentFailure::Transient(_) | JudgmentFailure::Timeout => {
                        FailureKind::TransientCollaboratorFailure
                    }
                    JudgmentFailure::Malformed(_) => FailureKind::MalformedJudgment,
                    JudgmentFailure::Rejected(_) => FailureKind::CollaboratorRejected,
                };
                return failure(item, kind, f.to_string(), attempts);
            }
        };

        let excerpt = build_excerpt(&verdict, &item.invoice_text, self.store.excerpt_max_chars());

        self.progress.embed(&item.invoice_id, self.embedder.model_name());
        let embedding = match self.embedder.embed(&excerpt).await {
            Ok(embedding) => embedding,
            Err(e) => return failure(item, FailureKind::EmbeddingFailed, e.to_string(), attempts),
        };

        let record = InvoiceAnalysisRecord {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: item.invoice_id.clone(),
            employee_name: verdict.employee_name,
            status: verdict.status,
            reason: verdict.reason,
            source_excerpt: excerpt,
            date: verdict.date.or(item.date),
            embedding,
            created_at: self.store.next_created_at(),
        };

        match self.store.put(record) {
            Ok(record) => ItemOutcome::Analyzed { record },
            Err(AppError::DuplicateId(id)) => failure(
                item,
                FailureKind::DuplicateId,
                format!("record id {} already exists", id),
                attempts,
            ),
            Err(e) => failure(item, FailureKind::Internal, e.to_string(), attempts),
        }
    }
}

/// Runs batches of invoices through judgment, embedding and publication.
pub struct BatchPipeline {
    store: Arc<RecordStore>,
    judge: Arc<dyn JudgmentCollaborator>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: PipelineConfig,
    progress: ProgressReporter,
}

impl BatchPipeline {
    pub fn new(
        store: Arc<RecordStore>,
        judge: Arc<dyn JudgmentCollaborator>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            store,
            judge,
            embedder,
            settings,
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    fn check_ready(&self) -> AppResult<()> {
        if self.settings.concurrency == 0 {
            return Err(AppError::Config(
                "pipeline.concurrency must be greater than zero".to_string(),
            ));
        }
        if self.settings.max_attempts == 0 {
            return Err(AppError::Config(
                "pipeline.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.store.is_closed() {
            return Err(AppError::Config(
                "record store is closed (store unreachable)".to_string(),
            ));
        }
        if self.embedder.dimensions() != self.store.dimension() {
            return Err(AppError::Config(format!(
                "embedding provider produces {} dimensions, ledger expects {}",
                self.embedder.dimensions(),
                self.store.dimension()
            )));
        }
        Ok(())
    }

    /// Analyze every item of `job`.
    ///
    /// Returns one outcome per item, in input order. Per-item failures are
    /// part of the report. The call itself fails on configuration problems
    /// and when every item was cancelled.
    pub async fn run(&self, job: BatchJob, cancel: &CancellationToken) -> AppResult<BatchReport> {
        self.check_ready()?;

        let started = Instant::now();
        let total = job.items.len();
        let invoice_ids: Vec<String> = job.items.iter().map(|i| i.invoice_id.clone()).collect();
        let progress = self.progress.for_batch(total);

        tracing::info!(
            items = total,
            concurrency = self.settings.concurrency,
            deadline_secs = ?self.settings.deadline_secs,
            "Starting batch analysis"
        );

        let halt = cancel.child_token();
        let deadline_at = self.settings.deadline().map(|d| tokio::time::Instant::now() + d);
        let watcher = deadline_at.map(|at| {
            let halt = halt.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        tracing::warn!("Batch deadline reached, cancelling remaining work");
                        halt.cancel();
                    }
                    _ = halt.cancelled() => {}
                }
            })
        });

        let worker = Arc::new(Worker {
            store: Arc::clone(&self.store),
            judge: Arc::clone(&self.judge),
            embedder: Arc::clone(&self.embedder),
            policy_text: job.policy,
            retry: RetryPolicy::from_config(&self.settings),
            halt: halt.clone(),
            progress: progress.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ItemOutcome)>();
        let mut tasks = JoinSet::new();
        let mut scheduled = 0;

        for (idx, item) in job.items.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            let worker = Arc::clone(&worker);
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = worker.process(item).await;
                let _ = tx.send((idx, outcome));
            });
            scheduled = idx + 1;
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Batch worker terminated abnormally: {}", e);
            }
        }
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let mut slots: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        while let Some((idx, outcome)) = rx.recv().await {
            slots[idx] = Some(outcome);
        }

        let stop_reason = if cancel.is_cancelled() {
            "batch cancelled before this invoice started"
        } else {
            "batch deadline reached before this invoice started"
        };

        let outcomes: Vec<ItemOutcome> = slots
            .into_iter()
            .zip(invoice_ids)
            .enumerate()
            .map(|(idx, (slot, invoice_id))| {
                slot.unwrap_or_else(|| {
                    let (kind, message) = if idx >= scheduled {
                        progress.cancelled(&invoice_id);
                        (FailureKind::Cancelled, stop_reason)
                    } else {
                        progress.failed(&invoice_id, "worker panicked");
                        (FailureKind::Internal, "worker panicked while analyzing this invoice")
                    };
                    ItemOutcome::Failed(ItemFailure {
                        invoice_id,
                        kind,
                        message: message.to_string(),
                        attempts: 0,
                    })
                })
            })
            .collect();

        let report = BatchReport {
            outcomes,
            duration_secs: started.elapsed().as_secs_f64(),
        };

        tracing::info!(
            analyzed = report.analyzed_count(),
            failed = report.failed_count(),
            duration_secs = report.duration_secs,
            "Batch analysis finished"
        );

        let all_cancelled = total > 0
            && report
                .outcomes
                .iter()
                .all(|o| o.failure().is_some_and(|f| f.kind == FailureKind::Cancelled));
        if all_cancelled {
            return Err(AppError::Cancelled(format!(
                "no invoice of {} was analyzed",
                total
            )));
        }

        Ok(report)
    }
}
