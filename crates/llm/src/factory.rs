//! LLM provider factory.
//!
//! Creates LLM clients from the provider name in the application config.

use crate::client::LlmClient;
use crate::providers::{ollama::DEFAULT_BASE_URL, OllamaClient};
use reimburse_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Connection options for a provider.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions<'a> {
    /// Custom endpoint URL
    pub endpoint: Option<&'a str>,

    /// Per-request timeout
    pub timeout: Option<Duration>,
}

/// Create an LLM client based on the provider name.
///
/// # Errors
/// Returns `AppError::Config` for unknown providers.
pub fn create_client(provider: &str, options: ClientOptions<'_>) -> AppResult<Arc<dyn LlmClient>> {
    match provider.to_lowercase().as_str() {
        "ollama" => {
            let base_url = options.endpoint.unwrap_or(DEFAULT_BASE_URL);
            let client = match options.timeout {
                Some(timeout) => OllamaClient::with_timeout(base_url, timeout)?,
                None => OllamaClient::with_base_url(base_url),
            };
            Ok(Arc::new(client))
        }
        _ => Err(AppError::Config(format!("Unknown provider: {}", provider))),
    }
}
