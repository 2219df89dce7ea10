//! Contracts for the external services the ledger depends on.
//!
//! The pipeline and the answer path only see these traits. LLM-backed
//! implementations live in [`judgment`] and [`synthesis`]; tests script
//! their own.

pub mod judgment;
pub mod synthesis;

pub use judgment::{parse_verdict, LlmJudge};
pub use synthesis::{build_context, DigestSynthesizer, LlmSynthesizer, NO_MATCH_ANSWER};

use crate::types::{ScoredRecord, Status};
use async_trait::async_trait;
use chrono::NaiveDate;
use reimburse_core::AppResult;
use std::fmt;

/// Structured decision for one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: Status,
    pub reason: String,
    /// Name as read from the invoice; may differ from the declared one
    pub employee_name: String,
    pub date: Option<NaiveDate>,
}

/// Why a judgment call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgmentFailure {
    /// Worth retrying (connection reset, 5xx, rate limit)
    Transient(String),
    /// The call exceeded its time budget
    Timeout,
    /// The reply could not be parsed into a [`Verdict`]
    Malformed(String),
    /// The collaborator refused the request
    Rejected(String),
}

impl JudgmentFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JudgmentFailure::Transient(_) | JudgmentFailure::Timeout)
    }
}

impl fmt::Display for JudgmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgmentFailure::Transient(msg) => write!(f, "transient failure: {}", msg),
            JudgmentFailure::Timeout => f.write_str("judgment call timed out"),
            JudgmentFailure::Malformed(msg) => write!(f, "malformed verdict: {}", msg),
            JudgmentFailure::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

/// Judges one invoice against a policy.
#[async_trait]
pub trait JudgmentCollaborator: Send + Sync {
    async fn evaluate(
        &self,
        policy: &str,
        invoice: &str,
        declared_name: &str,
    ) -> Result<Verdict, JudgmentFailure>;
}

/// Writes the user-facing answer from retrieved evidence.
#[async_trait]
pub trait AnswerSynthesisCollaborator: Send + Sync {
    async fn compose(&self, query: &str, evidence: &[ScoredRecord]) -> AppResult<String>;
}
