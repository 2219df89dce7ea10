//! Prompts command handler.

use clap::Args;
use reimburse_core::{config::AppConfig, AppResult};
use reimburse_prompt::{list_prompts, load_prompt};

/// List available prompts
#[derive(Args, Debug)]
pub struct PromptsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl PromptsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing prompts command");

        let mut prompts = Vec::new();
        for id in list_prompts(&config.workspace)? {
            match load_prompt(&config.workspace, &id) {
                Ok(def) => prompts.push((id, def.title)),
                Err(e) => {
                    tracing::warn!(prompt = %id, "Skipping invalid prompt: {}", e);
                }
            }
        }

        if self.json {
            let output: Vec<_> = prompts
                .iter()
                .map(|(id, title)| serde_json::json!({ "id": id, "title": title }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            for (id, title) in &prompts {
                println!("{:<20} {}", id, title);
            }
        }

        Ok(())
    }
}
