//! Hybrid query planning: structured pre-filter, then vector ranking.

use crate::config::QueryConfig;
use crate::embeddings::EmbeddingProvider;
use crate::query::extract::FilterExtractor;
use crate::query::predicate::QueryPredicate;
use crate::store::RecordStore;
use crate::types::ScoredRecord;
use crate::vector_index::SearchParams;
use chrono::NaiveDate;
use reimburse_core::{AppError, AppResult};
use std::collections::HashSet;
use std::sync::Arc;

/// Per-query overrides.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Result count; falls back to `query.k` from the ledger config
    pub k: Option<usize>,
    /// "Today" for relative date phrases
    pub reference_date: Option<NaiveDate>,
}

/// Result of planning and executing a query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Ranked records, best first. Never empty.
    Evidence {
        predicate: QueryPredicate,
        hits: Vec<ScoredRecord>,
    },
    /// Nothing satisfies the query.
    NoEvidence { predicate: QueryPredicate },
}

impl QueryOutcome {
    pub fn predicate(&self) -> &QueryPredicate {
        match self {
            QueryOutcome::Evidence { predicate, .. } | QueryOutcome::NoEvidence { predicate } => {
                predicate
            }
        }
    }

    pub fn hits(&self) -> &[ScoredRecord] {
        match self {
            QueryOutcome::Evidence { hits, .. } => hits,
            QueryOutcome::NoEvidence { .. } => &[],
        }
    }
}

/// Combines the filter extractor, the record store and the vector index.
#[derive(Debug)]
pub struct QueryPlanner {
    store: Arc<RecordStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: FilterExtractor,
    settings: QueryConfig,
}

impl QueryPlanner {
    pub fn new(
        store: Arc<RecordStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: QueryConfig,
    ) -> AppResult<Self> {
        let extractor = FilterExtractor::new(settings.week_start)?;
        Ok(Self {
            store,
            embedder,
            extractor,
            settings,
        })
    }

    pub fn extractor(&self) -> &FilterExtractor {
        &self.extractor
    }

    /// Answer `query` with the records that best support it.
    ///
    /// A non-empty predicate restricts ranking to the records it matches; if
    /// it matches none the index is not consulted and the outcome is
    /// [`QueryOutcome::NoEvidence`].
    ///
    /// # Errors
    /// `Config` when `options.k` is zero.
    pub async fn plan(&self, query: &str, options: &QueryOptions) -> AppResult<QueryOutcome> {
        let k = options.k.unwrap_or(self.settings.k);
        if k == 0 {
            return Err(AppError::Config("k must be greater than zero".to_string()));
        }

        let predicate = self.extractor.extract(query, options.reference_date);

        let allowed: Option<HashSet<String>> = if predicate.is_empty() {
            None
        } else {
            let mode = self.settings.name_match;
            let ids: HashSet<String> = self
                .store
                .scan(|record| predicate.matches(record, mode))?
                .map(|record| record.id.clone())
                .collect();
            tracing::debug!(predicate = %predicate, matches = ids.len(), "Pre-filtered records");
            Some(ids)
        };

        let nothing_to_rank = match &allowed {
            Some(ids) => ids.is_empty(),
            None => self.store.is_empty(),
        };
        if nothing_to_rank {
            tracing::info!(predicate = %predicate, "No records match query");
            return Ok(QueryOutcome::NoEvidence { predicate });
        }

        let embedding = self.embedder.embed(query).await?;
        if embedding.len() != self.store.dimension() {
            return Err(AppError::Knowledge(format!(
                "Query embedding has {} dimensions, ledger expects {}",
                embedding.len(),
                self.store.dimension()
            )));
        }

        let params = SearchParams {
            k,
            nprobe: self.settings.nprobe,
        };
        let found = self
            .store
            .index()
            .search(&embedding, &params, allowed.as_ref())?;

        let mut hits = Vec::with_capacity(found.len());
        for hit in found {
            match self.store.get(&hit.id) {
                Ok(record) => hits.push(ScoredRecord {
                    record,
                    score: hit.score,
                }),
                Err(AppError::NotFound(id)) => {
                    tracing::warn!(id = %id, "Index returned an id missing from the store");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            predicate = %predicate,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "Query planned"
        );

        if hits.is_empty() {
            Ok(QueryOutcome::NoEvidence { predicate })
        } else {
            Ok(QueryOutcome::Evidence { predicate, hits })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::embeddings::providers::TrigramProvider;
    use crate::ivf::IvfIndex;
    use crate::types::{InvoiceAnalysisRecord, Status};

    const DIM: usize = 128;

    async fn seeded() -> (Arc<RecordStore>, Arc<dyn EmbeddingProvider>) {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TrigramProvider::new(DIM));
        let store = Arc::new(RecordStore::new(
            Arc::new(IvfIndex::new(DIM, IndexConfig::default())),
            500,
        ));

        let rows = [
            ("a", "John Smith", Status::Declined, "Hotel exceeds nightly cap", "2024-03-04"),
            ("b", "John Smith", Status::Approved, "Taxi within limits", "2024-03-10"),
            ("c", "Maria Lopez", Status::Declined, "Alcohol is not reimbursable", "2024-04-02"),
        ];
        for (id, name, status, reason, date) in rows {
            let excerpt = format!("Employee: {} Status: {} Reason: {}", name, status, reason);
            let embedding = embedder.embed(&excerpt).await.unwrap();
            store
                .put(InvoiceAnalysisRecord {
                    id: id.to_string(),
                    invoice_id: format!("{}.txt", id),
                    employee_name: name.to_string(),
                    status,
                    reason: reason.to_string(),
                    source_excerpt: excerpt,
                    date: date.parse().ok(),
                    embedding,
                    created_at: store.next_created_at(),
                })
                .unwrap();
        }
        (store, embedder)
    }

    #[tokio::test]
    async fn test_filtered_query_returns_only_matches() {
        let (store, embedder) = seeded().await;
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let outcome = planner
            .plan("show declined invoices for John", &QueryOptions::default())
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.hits().iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(outcome.predicate().status, Some(Status::Declined));
    }

    #[tokio::test]
    async fn test_zero_match_is_no_evidence() {
        let (store, embedder) = seeded().await;
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let outcome = planner
            .plan("pending invoices by Zed", &QueryOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::NoEvidence { .. }));
    }

    #[tokio::test]
    async fn test_unfiltered_query_ranks_everything() {
        let (store, embedder) = seeded().await;
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let outcome = planner
            .plan(
                "hotel nightly cap",
                &QueryOptions {
                    k: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.hits().len(), 2);
        assert_eq!(outcome.hits()[0].record.id, "a");
        assert!(outcome.hits()[0].score >= outcome.hits()[1].score);
    }

    #[tokio::test]
    async fn test_zero_k_is_rejected() {
        let (store, embedder) = seeded().await;
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let err = planner
            .plan(
                "hotel nightly cap",
                &QueryOptions {
                    k: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_store_is_no_evidence() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TrigramProvider::new(DIM));
        let store = Arc::new(RecordStore::new(
            Arc::new(IvfIndex::new(DIM, IndexConfig::default())),
            500,
        ));
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let outcome = planner.plan("anything", &QueryOptions::default()).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::NoEvidence { .. }));
    }

    #[tokio::test]
    async fn test_date_filter_with_reference() {
        let (store, embedder) = seeded().await;
        let planner = QueryPlanner::new(store, embedder, QueryConfig::default()).unwrap();

        let outcome = planner
            .plan(
                "what was submitted in April",
                &QueryOptions {
                    k: None,
                    reference_date: NaiveDate::from_ymd_opt(2024, 6, 1),
                },
            )
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.hits().iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }
}
