//! Question answering over the ledger.
//!
//! Plans the query, hands the evidence to a synthesis collaborator and maps
//! the records to user-facing source references.

use crate::collaborators::{AnswerSynthesisCollaborator, NO_MATCH_ANSWER};
use crate::query::{QueryOptions, QueryOutcome, QueryPlanner, QueryPredicate};
use crate::types::{ScoredRecord, Status};
use chrono::NaiveDate;
use reimburse_core::AppResult;
use serde::{Deserialize, Serialize};

/// Maximum snippet length for source references.
const MAX_SNIPPET_LENGTH: usize = 150;

/// One analysis the answer was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub invoice_id: String,
    pub employee_name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Start of the verdict reason
    pub snippet: String,
}

/// Answer to a natural-language question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,

    pub sources: Vec<SourceRef>,

    /// Filters read from the question
    pub predicate: QueryPredicate,

    /// Highest similarity among the sources, 0.0 without evidence
    #[serde(skip_serializing, default)]
    pub max_score: f32,
}

impl AnswerResponse {
    /// Fixed reply when nothing matches.
    pub fn no_match(predicate: QueryPredicate) -> Self {
        Self {
            answer: NO_MATCH_ANSWER.to_string(),
            sources: Vec::new(),
            predicate,
            max_score: 0.0,
        }
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= MAX_SNIPPET_LENGTH {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SNIPPET_LENGTH - 3).collect();
    format!("{}...", cut.trim_end())
}

fn to_sources(hits: &[ScoredRecord]) -> Vec<SourceRef> {
    hits.iter()
        .map(|hit| SourceRef {
            invoice_id: hit.record.invoice_id.clone(),
            employee_name: hit.record.employee_name.clone(),
            status: hit.record.status,
            date: hit.record.date,
            snippet: snippet(&hit.record.reason),
        })
        .collect()
}

/// Plan `query` and compose an answer from the evidence.
///
/// Without evidence the synthesizer is not called and the fixed
/// "no matching invoices" reply is returned.
pub async fn answer_query(
    planner: &QueryPlanner,
    synthesizer: &dyn AnswerSynthesisCollaborator,
    query: &str,
    options: &QueryOptions,
) -> AppResult<AnswerResponse> {
    tracing::info!(query = %query, "Answering question");

    match planner.plan(query, options).await? {
        QueryOutcome::NoEvidence { predicate } => Ok(AnswerResponse::no_match(predicate)),
        QueryOutcome::Evidence { predicate, hits } => {
            let answer = synthesizer.compose(query, &hits).await?;
            let max_score = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
            Ok(AnswerResponse {
                answer,
                sources: to_sources(&hits),
                predicate,
                max_score,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let s = snippet(&long);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), MAX_SNIPPET_LENGTH);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn test_no_match_response() {
        let response = AnswerResponse::no_match(QueryPredicate::default());
        assert_eq!(response.answer, NO_MATCH_ANSWER);
        assert!(response.sources.is_empty());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("max_score").is_none());
    }
}
