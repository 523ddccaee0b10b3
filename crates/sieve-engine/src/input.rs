//! Loading input records and filtering them through the script's input rules.

use std::path::Path;

use regex::Regex;
use sieve_types::{InputField, InputRule, Result, SieveError};

use crate::context::BotInput;

/// Read one record per non-empty line.
pub async fn load_records(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_records(&text))
}

pub fn parse_records(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect()
}

struct CompiledRule {
    field: InputField,
    regex: Regex,
}

impl CompiledRule {
    fn accepts(&self, input: &BotInput) -> bool {
        let value = match self.field {
            InputField::Record => &input.raw,
            InputField::Username => &input.username,
            InputField::Password => &input.password,
        };
        self.regex.is_match(value)
    }
}

/// Keep only records that satisfy every rule.
pub fn apply_rules(records: Vec<String>, rules: &[InputRule]) -> Result<Vec<String>> {
    if rules.is_empty() {
        return Ok(records);
    }
    let compiled = rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.regex)
                .map(|regex| CompiledRule {
                    field: rule.field,
                    regex,
                })
                .map_err(|e| SieveError::InvalidInputRule {
                    field: rule.field.as_str().to_string(),
                    message: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let before = records.len();
    let kept: Vec<String> = records
        .into_iter()
        .filter(|raw| {
            let input = BotInput::new(raw.as_str());
            compiled.iter().all(|rule| rule.accepts(&input))
        })
        .collect();
    tracing::debug!(before, after = kept.len(), "Input rules applied");
    Ok(kept)
}
