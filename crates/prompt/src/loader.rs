//! Prompt loader for YAML prompt definitions.

use crate::defaults;
use crate::types::PromptDefinition;
use reimburse_core::config::STATE_DIR;
use reimburse_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

fn prompts_dir(workspace_path: &Path) -> PathBuf {
    workspace_path.join(STATE_DIR).join("prompts")
}

/// Load a prompt definition by ID.
///
/// A file named `<id>.yml` in `.reimburse/prompts/` takes precedence over the
/// built-in definition of the same ID.
///
/// # Example
/// ```no_run
/// use reimburse_prompt::{load_prompt, JUDGE_PROMPT_ID};
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), JUDGE_PROMPT_ID)?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    if prompt_file.exists() {
        tracing::debug!("Loading prompt from: {:?}", prompt_file);

        let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
            AppError::Prompt(format!(
                "Failed to read prompt file {:?}: {}",
                prompt_file, e
            ))
        })?;

        let definition = parse_prompt(&contents, &prompt_file.display().to_string())?;
        tracing::info!("Loaded prompt override: {} ({})", definition.id, definition.title);
        return Ok(definition);
    }

    match defaults::builtin_yaml(prompt_id) {
        Some(yaml) => {
            tracing::debug!("Using built-in prompt: {}", prompt_id);
            parse_prompt(yaml, prompt_id)
        }
        None => Err(AppError::Prompt(format!(
            "Prompt not found: {} (no file at {:?} and no built-in)",
            prompt_id, prompt_file
        ))),
    }
}

/// Parse and validate a prompt definition from YAML text.
///
/// `source` names where the text came from, for error messages.
pub fn parse_prompt(yaml: &str, source: &str) -> AppResult<PromptDefinition> {
    let definition: PromptDefinition = serde_yaml::from_str(yaml).map_err(|e| {
        AppError::Prompt(format!("Failed to parse prompt YAML {}: {}", source, e))
    })?;

    validate_prompt(&definition)?;
    Ok(definition)
}

/// List prompt IDs: built-ins plus any workspace overrides or additions.
pub fn list_prompts(workspace_path: &Path) -> AppResult<Vec<String>> {
    let mut prompt_ids: Vec<String> = defaults::builtin_ids()
        .iter()
        .map(|id| id.to_string())
        .collect();

    let dir = prompts_dir(workspace_path);
    if dir.exists() {
        for entry in walkdir::WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("yml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    prompt_ids.push(stem.to_string());
                }
            }
        }
    }

    prompt_ids.sort();
    prompt_ids.dedup();
    Ok(prompt_ids)
}

fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if def.template.trim().is_empty() {
        return Err(AppError::Prompt(
            "Prompt template cannot be empty".to_string(),
        ));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{ANSWER_PROMPT_ID, JUDGE_PROMPT_ID};
    use std::fs;
    use tempfile::TempDir;

    fn write_prompt(dir: &Path, id: &str, content: &str) {
        let prompts = prompts_dir(dir);
        fs::create_dir_all(&prompts).unwrap();
        fs::write(prompts.join(format!("{}.yml", id)), content).unwrap();
    }

    fn valid_yaml(id: &str, template: &str) -> String {
        format!(
            r#"
id: {}
title: "Custom"
apiVersion: "1.0"
behavior:
  tone: neutral
  style: concise
template: "{}"
output:
  format: text
"#,
            id, template
        )
    }

    #[test]
    fn test_builtin_used_without_override() {
        let temp_dir = TempDir::new().unwrap();
        let prompt = load_prompt(temp_dir.path(), JUDGE_PROMPT_ID).unwrap();
        assert_eq!(prompt.id, JUDGE_PROMPT_ID);
        assert!(prompt.output.is_json());
    }

    #[test]
    fn test_workspace_override_wins() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(
            temp_dir.path(),
            ANSWER_PROMPT_ID,
            &valid_yaml(ANSWER_PROMPT_ID, "Q: {{query}}"),
        );

        let prompt = load_prompt(temp_dir.path(), ANSWER_PROMPT_ID).unwrap();
        assert_eq!(prompt.title, "Custom");
        assert_eq!(prompt.template, "Q: {{query}}");
    }

    #[test]
    fn test_load_nonexistent_prompt() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_prompt(temp_dir.path(), "nonexistent").is_err());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "broken", "invalid: yaml: content:");
        assert!(load_prompt(temp_dir.path(), "broken").is_err());
    }

    #[test]
    fn test_bad_api_version_rejected() {
        let yaml = valid_yaml("x", "t").replace("\"1.0\"", "\"1\"");
        assert!(parse_prompt(&yaml, "inline").is_err());
    }

    #[test]
    fn test_list_prompts_merges_builtins() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "custom.one", &valid_yaml("custom.one", "t"));
        write_prompt(
            temp_dir.path(),
            JUDGE_PROMPT_ID,
            &valid_yaml(JUDGE_PROMPT_ID, "t"),
        );

        let prompts = list_prompts(temp_dir.path()).unwrap();
        assert_eq!(prompts, vec!["custom.one", ANSWER_PROMPT_ID, JUDGE_PROMPT_ID]);
    }
}
