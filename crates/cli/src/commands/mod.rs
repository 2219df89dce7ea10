//! Command handlers for the reimburse CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod analyze;
pub mod ask;
pub mod ledger;
pub mod prompts;

// Re-export command types for convenience
pub use analyze::AnalyzeCommand;
pub use ask::AskCommand;
pub use ledger::LedgerCommand;
pub use prompts::PromptsCommand;
