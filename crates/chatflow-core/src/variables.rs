use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::typebot::Variable;

/// A pending write of `value` into the variable `variable_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUpdate {
    pub variable_id: String,
    pub value: String,
}

impl VariableUpdate {
    pub fn new(variable_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable_id: variable_id.into(),
            value: value.into(),
        }
    }
}

/// An answer submitted to an input step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub block_id: String,
    pub step_id: String,
    #[serde(default)]
    pub variable_id: Option<String>,
    pub content: String,
}

/// Everything accumulated by a conversation so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultValues {
    pub answers: Vec<Answer>,
    /// Variables that currently hold a value.
    pub variables: Vec<Variable>,
}

/// Shared, mutable variable store for one conversation.
///
/// Every typebot injected into the conversation reads and writes the same
/// store; there is no namespacing per graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableStore {
    variables: Vec<Variable>,
    answers: Vec<Answer>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a typebot's variables.
    pub fn from_variables(variables: &[Variable]) -> Self {
        Self {
            variables: variables.to_vec(),
            answers: Vec::new(),
        }
    }

    /// Add variables not already known by id. Existing values are kept.
    pub fn register(&mut self, variables: &[Variable]) {
        for variable in variables {
            if self.get(&variable.id).is_none() {
                self.variables.push(variable.clone());
            }
        }
    }

    pub fn get(&self, variable_id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == variable_id)
    }

    /// Get a variable's value, if it has one.
    pub fn value(&self, variable_id: &str) -> Option<&str> {
        self.get(variable_id).and_then(|v| v.value.as_deref())
    }

    /// Write a value. Returns false if the variable is unknown.
    pub fn update_variable_value(&mut self, variable_id: &str, value: impl Into<String>) -> bool {
        match self.variables.iter_mut().find(|v| v.id == variable_id) {
            Some(variable) => {
                variable.value = Some(value.into());
                true
            }
            None => {
                debug!(variable_id, "Ignoring write to unknown variable");
                false
            }
        }
    }

    /// Apply a batch of writes in order.
    pub fn update_variables(&mut self, updates: impl IntoIterator<Item = VariableUpdate>) {
        for update in updates {
            self.update_variable_value(&update.variable_id, update.value);
        }
    }

    pub fn record_answer(&mut self, answer: Answer) {
        self.answers.push(answer);
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Snapshot of answers and set variables.
    pub fn current_values(&self) -> ResultValues {
        ResultValues {
            answers: self.answers.clone(),
            variables: self
                .variables
                .iter()
                .filter(|v| v.value.is_some())
                .cloned()
                .collect(),
        }
    }

    /// Substitute `{{Variable name}}` placeholders in `text`.
    pub fn parse(&self, text: &str) -> String {
        parse_variables(text, &self.variables)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("valid regex"))
}

/// Replace every `{{name}}` with the value of the variable called `name`.
///
/// Unknown variables and variables without a value render as an empty string.
pub fn parse_variables(text: &str, variables: &[Variable]) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    placeholder_regex()
        .replace_all(text, |caps: &Captures| {
            let name = caps[1].trim();
            variables
                .iter()
                .find(|v| v.name == name)
                .and_then(|v| v.value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}
