//! Built-in prompt definitions.
//!
//! A workspace can replace either prompt by writing
//! `.reimburse/prompts/<id>.yml`.

/// Prompt used to judge one invoice against the policy.
pub const JUDGE_PROMPT_ID: &str = "invoice.judge";

/// Prompt used to answer a question from retrieved analyses.
pub const ANSWER_PROMPT_ID: &str = "invoice.answer";

const JUDGE_PROMPT_YAML: &str = r#"
id: invoice.judge
title: Invoice compliance judgment
apiVersion: "1.0"
createdBy: reimburse
behavior:
  tone: professional
  style: concise
  temperature: 0.1
variables: [policy, invoice, employee_name]
system: >-
  You are an expert HR reimbursement analyst. You judge expense invoices
  strictly against the reimbursement policy you are given.
template: |
  Analyze the invoice below against the HR reimbursement policy and decide
  its reimbursement status. Use exactly one of these statuses:
  Approved, Declined, NeedsInformation.
  Give a clear, detailed reason grounded in the policy. If the invoice shows
  a date, report it as YYYY-MM-DD, otherwise use null.

  Return only JSON in this format:
  {
    "status": "<Approved|Declined|NeedsInformation>",
    "reason": "<detailed reason>",
    "employee_name": "{{employee_name}}",
    "date": "<YYYY-MM-DD or null>"
  }

  HR Policy:
  {{policy}}

  Invoice:
  {{invoice}}
output:
  format: json
"#;

const ANSWER_PROMPT_YAML: &str = r#"
id: invoice.answer
title: Invoice question answering
apiVersion: "1.0"
createdBy: reimburse
behavior:
  tone: professional
  style: structured
  temperature: 0.3
variables: [query, context]
system: >-
  You are an intelligent assistant for invoice reimbursement queries.
template: |
  Given the following user query and a set of relevant invoice analyses,
  provide a clear, structured, and helpful answer in markdown format.
  Summarize the findings, highlight any patterns, and answer the user's
  question directly. Only use the analyses below.

  User Query:
  {{query}}

  Relevant Invoice Analyses:
  {{context}}
output:
  format: markdown
"#;

/// Look up the YAML source of a built-in prompt.
pub fn builtin_yaml(prompt_id: &str) -> Option<&'static str> {
    match prompt_id {
        JUDGE_PROMPT_ID => Some(JUDGE_PROMPT_YAML),
        ANSWER_PROMPT_ID => Some(ANSWER_PROMPT_YAML),
        _ => None,
    }
}

/// IDs of every built-in prompt.
pub fn builtin_ids() -> [&'static str; 2] {
    [JUDGE_PROMPT_ID, ANSWER_PROMPT_ID]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_prompt;

    #[test]
    fn test_builtins_parse_and_validate() {
        for id in builtin_ids() {
            let yaml = builtin_yaml(id).unwrap();
            let def = parse_prompt(yaml, id).unwrap();
            assert_eq!(def.id, id);
        }
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(builtin_yaml("agent.ask.default").is_none());
    }
}
