//! Answer synthesis from retrieved analyses.

use crate::collaborators::AnswerSynthesisCollaborator;
use crate::types::{ScoredRecord, Status};
use async_trait::async_trait;
use reimburse_core::{AppConfig, AppError, AppResult};
use reimburse_llm::{create_client, ClientOptions, LlmClient, LlmRequest};
use reimburse_prompt::{build_prompt, load_prompt, PromptDefinition, ANSWER_PROMPT_ID};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Reply when no analysis supports the question.
pub const NO_MATCH_ANSWER: &str = "No matching invoices found. Please try a different query.";

const MAX_ANSWER_TOKENS: u32 = 1000;

/// Render evidence as the plain-text context block given to the model.
pub fn build_context(evidence: &[ScoredRecord]) -> String {
    evidence
        .iter()
        .map(|hit| {
            let record = &hit.record;
            format!(
                "Invoice ID: {}\nStatus: {}\nReason: {}\nEmployee: {}\nDate: {}",
                record.invoice_id,
                record.status,
                record.reason,
                record.employee_name,
                record
                    .date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Answers through the language model using the `invoice.answer` prompt.
pub struct LlmSynthesizer {
    client: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, prompt: PromptDefinition) -> Self {
        Self {
            client,
            model: model.into(),
            prompt,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = create_client(
            &config.provider,
            ClientOptions {
                endpoint: config.endpoint.as_deref(),
                timeout: Some(Duration::from_secs(config.request_timeout_secs)),
            },
        )?;
        let prompt = load_prompt(&config.workspace, ANSWER_PROMPT_ID)?;
        Ok(Self::new(client, config.model.clone(), prompt))
    }
}

#[async_trait]
impl AnswerSynthesisCollaborator for LlmSynthesizer {
    async fn compose(&self, query: &str, evidence: &[ScoredRecord]) -> AppResult<String> {
        if evidence.is_empty() {
            return Ok(NO_MATCH_ANSWER.to_string());
        }

        let variables = HashMap::from([
            ("query".to_string(), query.to_string()),
            ("context".to_string(), build_context(evidence)),
        ]);
        let built = build_prompt(&self.prompt, variables)?;

        let mut request =
            LlmRequest::new(built.user, self.model.clone()).with_max_tokens(MAX_ANSWER_TOKENS);
        if let Some(system) = built.system {
            request = request.with_system(system);
        }
        if let Some(temperature) = built.temperature {
            request = request.with_temperature(temperature);
        }

        tracing::debug!(evidence = evidence.len(), model = %self.model, "Composing answer");

        let response = self
            .client
            .complete(&request)
            .await
            .map_err(|e| AppError::Knowledge(format!("Answer synthesis failed: {}", e)))?;

        Ok(response.content.trim().to_string())
    }
}

/// Offline synthesizer: a Markdown digest of the evidence, no model call.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSynthesizer;

#[async_trait]
impl AnswerSynthesisCollaborator for DigestSynthesizer {
    async fn compose(&self, query: &str, evidence: &[ScoredRecord]) -> AppResult<String> {
        if evidence.is_empty() {
            return Ok(NO_MATCH_ANSWER.to_string());
        }

        let count = |status: Status| evidence.iter().filter(|h| h.record.status == status).count();

        let mut out = String::new();
        let _ = writeln!(out, "**{}** matching analyses for _{}_\n", evidence.len(), query.trim());
        let _ = writeln!(
            out,
            "Approved: {} · Declined: {} · Needs information: {}\n",
            count(Status::Approved),
            count(Status::Declined),
            count(Status::NeedsInformation)
        );
        let _ = writeln!(out, "| Invoice | Employee | Status | Date | Reason |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for hit in evidence {
            let r = &hit.record;
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                r.invoice_id,
                r.employee_name,
                r.status,
                r.date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                r.reason.replace('|', "/").replace('\n', " ")
            );
        }
        Ok(out.trim_end().to_string())
    }
}
