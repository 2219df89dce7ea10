//! LLM-backed invoice judgment.

use crate::collaborators::{JudgmentCollaborator, JudgmentFailure, Verdict};
use crate::types::Status;
use async_trait::async_trait;
use chrono::NaiveDate;
use reimburse_core::{AppConfig, AppError, AppResult};
use reimburse_llm::{create_client, ClientOptions, LlmClient, LlmRequest};
use reimburse_prompt::{build_prompt, load_prompt, PromptDefinition, JUDGE_PROMPT_ID};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_VERDICT_TOKENS: u32 = 800;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    employee_name: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

/// Parse a model reply into a [`Verdict`].
///
/// Accepts bare JSON, JSON inside a Markdown code fence, and JSON surrounded
/// by prose. The status must be one of the closed set. A missing or empty
/// `employee_name` falls back to `declared_name`; an unparseable date is
/// dropped.
pub fn parse_verdict(raw: &str, declared_name: &str) -> Result<Verdict, JudgmentFailure> {
    let body = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(JudgmentFailure::Malformed(
                "reply contains no JSON object".to_string(),
            ))
        }
    };

    let parsed: RawVerdict = serde_json::from_str(json)
        .map_err(|e| JudgmentFailure::Malformed(format!("invalid verdict JSON: {}", e)))?;

    let status: Status = parsed
        .status
        .parse()
        .map_err(|_| JudgmentFailure::Malformed(format!("unknown status '{}'", parsed.status)))?;

    let employee_name = parsed
        .employee_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| declared_name.to_string());

    let date = parsed
        .date
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

    Ok(Verdict {
        status,
        reason: parsed.reason.unwrap_or_default().trim().to_string(),
        employee_name,
        date,
    })
}

/// Judges invoices by prompting a language model.
pub struct LlmJudge {
    client: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
}

impl LlmJudge {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, prompt: PromptDefinition) -> Self {
        Self {
            client,
            model: model.into(),
            prompt,
        }
    }

    /// Build a judge from the application config, using the workspace's
    /// prompt override when one exists.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = create_client(
            &config.provider,
            ClientOptions {
                endpoint: config.endpoint.as_deref(),
                timeout: Some(Duration::from_secs(config.request_timeout_secs)),
            },
        )?;
        let prompt = load_prompt(&config.workspace, JUDGE_PROMPT_ID)?;
        Ok(Self::new(client, config.model.clone(), prompt))
    }

    fn request(&self, policy: &str, invoice: &str, declared_name: &str) -> AppResult<LlmRequest> {
        let variables = HashMap::from([
            ("policy".to_string(), policy.to_string()),
            ("invoice".to_string(), invoice.to_string()),
            ("employee_name".to_string(), declared_name.to_string()),
        ]);
        let built = build_prompt(&self.prompt, variables)?;

        let mut request =
            LlmRequest::new(built.user, self.model.clone()).with_max_tokens(MAX_VERDICT_TOKENS);
        if let Some(system) = built.system {
            request = request.with_system(system);
        }
        if let Some(temperature) = built.temperature {
            request = request.with_temperature(temperature);
        }
        if built.json_output {
            request = request.with_json_output();
        }
        Ok(request)
    }
}

#[async_trait]
impl JudgmentCollaborator for LlmJudge {
    async fn evaluate(
        &self,
        policy: &str,
        invoice: &str,
        declared_name: &str,
    ) -> Result<Verdict, JudgmentFailure> {
        let request = self
            .request(policy, invoice, declared_name)
            .map_err(|e| JudgmentFailure::Rejected(e.to_string()))?;

        let response = self.client.complete(&request).await.map_err(|e| match e {
            AppError::LlmUnavailable(msg) => JudgmentFailure::Transient(msg),
            other => JudgmentFailure::Rejected(other.to_string()),
        })?;

        tracing::debug!(
            model = %response.model,
            completion_tokens = response.usage.completion_tokens,
            "Received verdict"
        );

        parse_verdict(&response.content, declared_name)
    }
}
