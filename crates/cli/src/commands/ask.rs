//! Ask command handler.
//!
//! Answers natural-language questions from the recorded verdicts.

use chrono::NaiveDate;
use clap::Args;
use reimburse_core::{config::AppConfig, AppResult};
use reimburse_knowledge::{
    AnswerSynthesisCollaborator, DigestSynthesizer, Ledger, LlmSynthesizer, QueryOptions,
};

/// Ask a question about the recorded verdicts
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question, e.g. "declined invoices for John in March 2024"
    pub query: String,

    /// Number of records to retrieve (default from ledger config)
    #[arg(short = 'k', long)]
    pub k: Option<usize>,

    /// Date that relative phrases ("last month") resolve against (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub today: Option<NaiveDate>,

    /// List the matching records instead of asking the model to summarize them
    #[arg(long)]
    pub no_synthesis: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let ledger = Ledger::open(&config.workspace)?;

        let synthesizer: Box<dyn AnswerSynthesisCollaborator> = if self.no_synthesis {
            Box::new(DigestSynthesizer)
        } else {
            Box::new(LlmSynthesizer::from_config(config)?)
        };

        let options = QueryOptions {
            k: self.k,
            reference_date: Some(
                self.today
                    .unwrap_or_else(|| chrono::Local::now().date_naive()),
            ),
        };

        let response = ledger
            .ask(&self.query, synthesizer.as_ref(), &options)
            .await?;

        tracing::info!(
            sources = response.sources.len(),
            max_score = response.max_score,
            "Answer ready"
        );

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            println!("Filters: {}", response.predicate);
            println!();
            println!("Answer:");
            println!("{}", response.answer);
            println!();

            if response.sources.is_empty() {
                println!("Sources: (no matching invoices)");
            } else {
                println!("Sources:");
                for source in &response.sources {
                    let date = source
                        .date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "no date".to_string());
                    println!(
                        "- {} ({}, {}, {})",
                        source.invoice_id, source.status, source.employee_name, date
                    );
                }
            }
        }

        Ok(())
    }
}
