//! Bounded retries with exponential backoff for judgment calls.

use crate::collaborators::{JudgmentCollaborator, JudgmentFailure, Verdict};
use crate::config::PipelineConfig;
use crate::progress::ProgressReporter;
use crate::types::BatchItem;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget, per-call timeout and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            call_timeout: config.call_timeout(),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Why [`judge_with_retry`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Last failure after `attempts` calls; non-retryable failures stop at once
    Failed {
        failure: JudgmentFailure,
        attempts: u32,
    },
    /// `halt` fired during a call or a backoff pause
    Cancelled { attempts: u32 },
}

/// Call the judge until it succeeds, fails permanently, runs out of attempts
/// or `halt` is cancelled.
///
/// Transient failures and timeouts are retried; malformed and rejected
/// verdicts are not. Returns the verdict with the number of calls made.
pub async fn judge_with_retry(
    judge: &dyn JudgmentCollaborator,
    policy: &RetryPolicy,
    halt: &CancellationToken,
    progress: &ProgressReporter,
    policy_text: &str,
    item: &BatchItem,
) -> Result<(Verdict, u32), RetryError> {
    let invoice_id = item.invoice_id.as_str();
    let mut attempt = 0;

    loop {
        attempt += 1;
        progress.judge(invoice_id, attempt);

        let call = tokio::time::timeout(
            policy.call_timeout,
            judge.evaluate(policy_text, &item.invoice_text, &item.employee_name),
        );
        let result = tokio::select! {
            biased;
            _ = halt.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            result = call => result.unwrap_or(Err(JudgmentFailure::Timeout)),
        };

        let failure = match result {
            Ok(verdict) => return Ok((verdict, attempt)),
            Err(failure) => failure,
        };

        if !failure.is_retryable() || attempt >= policy.max_attempts {
            return Err(RetryError::Failed {
                failure,
                attempts: attempt,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::warn!(
            invoice = %invoice_id,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Judgment failed, retrying: {}",
            failure
        );

        tokio::select! {
            biased;
            _ = halt.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
