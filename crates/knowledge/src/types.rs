//! Core types for the invoice ledger.

use chrono::NaiveDate;
use reimburse_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Reimbursement status of an analyzed invoice.
///
/// The set is closed: parsing any other value fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Approved,
    Declined,
    NeedsInformation,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Approved, Status::Declined, Status::NeedsInformation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Approved => "Approved",
            Status::Declined => "Declined",
            Status::NeedsInformation => "NeedsInformation",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = AppError;

    /// Accepts the canonical names case-insensitively, ignoring spaces,
    /// underscores and hyphens ("needs information", "NEEDS_INFORMATION").
    fn from_str(s: &str) -> AppResult<Self> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "approved" => Ok(Status::Approved),
            "declined" => Ok(Status::Declined),
            "needsinformation" => Ok(Status::NeedsInformation),
            _ => Err(AppError::InvalidRecord(format!("Unknown status: '{}'", s))),
        }
    }
}

/// One analyzed invoice, as published to the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceAnalysisRecord {
    /// Unique, immutable record identifier
    pub id: String,

    /// Caller's identifier for the invoice (usually the file name)
    pub invoice_id: String,

    pub employee_name: String,

    pub status: Status,

    pub reason: String,

    /// Normalized text the embedding was computed from
    pub source_excerpt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    pub embedding: Vec<f32>,

    /// Logical publication timestamp
    pub created_at: u64,
}

/// Shared handle to a published record.
pub type RecordRef = Arc<InvoiceAnalysisRecord>;

/// A record paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: RecordRef,
    pub score: f32,
}

/// One invoice submitted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub invoice_id: String,
    pub invoice_text: String,
    /// Employee name declared by the submitter
    pub employee_name: String,
    /// Invoice date if the caller already knows it
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// A policy plus the ordered invoices to judge against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub policy: String,
    pub items: Vec<BatchItem>,
}

/// Why a single item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedJudgment,
    TransientCollaboratorFailure,
    CollaboratorRejected,
    DuplicateId,
    EmbeddingFailed,
    InvalidInput,
    Cancelled,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::MalformedJudgment => "malformed judgment",
            FailureKind::TransientCollaboratorFailure => "transient collaborator failure",
            FailureKind::CollaboratorRejected => "collaborator rejected",
            FailureKind::DuplicateId => "duplicate id",
            FailureKind::EmbeddingFailed => "embedding failed",
            FailureKind::InvalidInput => "invalid input",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Failure descriptor for one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub invoice_id: String,
    pub kind: FailureKind,
    pub message: String,
    /// Judgment attempts made before giving up
    pub attempts: u32,
}

/// Result for one batch item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Analyzed { record: RecordRef },
    Failed(ItemFailure),
}

impl ItemOutcome {
    pub fn is_analyzed(&self) -> bool {
        matches!(self, ItemOutcome::Analyzed { .. })
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            ItemOutcome::Failed(failure) => Some(failure),
            ItemOutcome::Analyzed { .. } => None,
        }
    }

    pub fn record(&self) -> Option<&RecordRef> {
        match self {
            ItemOutcome::Analyzed { record } => Some(record),
            ItemOutcome::Failed(_) => None,
        }
    }
}

/// Outcome of a whole batch, one entry per input item in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
    pub duration_secs: f64,
}

impl BatchReport {
    pub fn analyzed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_analyzed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.analyzed_count()
    }
}

/// Summary statistics for a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub records: usize,
    pub approved: usize,
    pub declined: usize,
    pub needs_information: usize,
    pub employees: usize,
    pub dimension: usize,
    pub index_clusters: usize,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub snapshot_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_closed_set() {
        assert_eq!("approved".parse::<Status>().unwrap(), Status::Approved);
        assert_eq!("DECLINED".parse::<Status>().unwrap(), Status::Declined);
        assert_eq!(
            "needs information".parse::<Status>().unwrap(),
            Status::NeedsInformation
        );
        assert_eq!(
            "needs_information".parse::<Status>().unwrap(),
            Status::NeedsInformation
        );
        assert!("Fully Reimbursed".parse::<Status>().is_err());
        assert!("".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serde_uses_canonical_names() {
        let json = serde_json::to_string(&Status::NeedsInformation).unwrap();
        assert_eq!(json, "\"NeedsInformation\"");
        assert!(serde_json::from_str::<Status>("\"Pending\"").is_err());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let outcome = ItemOutcome::Failed(ItemFailure {
            invoice_id: "inv.txt".to_string(),
            kind: FailureKind::MalformedJudgment,
            message: "not json".to_string(),
            attempts: 1,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "malformed_judgment");
    }
}
