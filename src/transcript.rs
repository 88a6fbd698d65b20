use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
}

impl Exchange {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

pub fn load(path: &Path) -> Result<Vec<Exchange>, LoadError> {
    let text = fs::read_to_string(path)?;
    parse(&text)
}

/// Parses and validates a transcript. Any malformed entry rejects the whole
/// document; nothing is skipped.
pub fn parse(text: &str) -> Result<Vec<Exchange>, LoadError> {
    let doc: Value = serde_json::from_str(text)?;
    match doc {
        Value::Array(entries) => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| exchange_at(index, entry))
            .collect(),
        other => Err(LoadError::NotAnArray(kind(&other))),
    }
}

fn exchange_at(index: usize, entry: &Value) -> Result<Exchange, LoadError> {
    let obj = entry.as_object().ok_or(LoadError::NotAnObject {
        index,
        found: kind(entry),
    })?;
    let field = |name: &'static str| match obj.get(name) {
        None | Some(Value::Null) => Err(LoadError::MissingField { index, field: name }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(LoadError::NotAString {
            index,
            field: name,
            found: kind(other),
        }),
    };
    Ok(Exchange {
        prompt: field("prompt")?,
        response: field("response")?,
    })
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
