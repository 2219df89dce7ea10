//! Prompt system for invoice judgment and answer synthesis.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions
//! - Built-in defaults that a workspace can override
//! - Handlebars template rendering

pub mod builder;
pub mod defaults;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use defaults::{ANSWER_PROMPT_ID, JUDGE_PROMPT_ID};
pub use loader::{list_prompts, load_prompt, parse_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptBehavior, PromptDefinition, PromptOutputSpec};
