//! Error types for the reimbursement ledger.
//!
//! A single error enum covers configuration, I/O, LLM, ledger and prompt
//! failures. Ledger-specific kinds (`DuplicateId`, `NotFound`, `Cancelled`)
//! are separate variants so callers can match on them.

use thiserror::Error;

/// Unified error type for the workspace.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors that retrying will not fix
    #[error("LLM error: {0}")]
    Llm(String),

    /// LLM provider temporarily unreachable (timeouts, 5xx, rate limits)
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// Ledger, index and retrieval errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// A record with this id is already stored
    #[error("Duplicate record id: {0}")]
    DuplicateId(String),

    /// Lookup miss
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record failed validation before publish
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Cancellation or deadline observed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::LlmUnavailable(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::LlmUnavailable("timeout".to_string()).is_transient());
        assert!(!AppError::Llm("bad request".to_string()).is_transient());
        assert!(!AppError::DuplicateId("a".to_string()).is_transient());
    }

    #[test]
    fn test_display_includes_id() {
        let err = AppError::DuplicateId("inv-1".to_string());
        assert_eq!(err.to_string(), "Duplicate record id: inv-1");
    }

    #[test]
    fn test_from_serde_json() {
        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
