use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde_json::{Map, Value};

use chatflow_core::error::{FlowError, Result};
use chatflow_core::{EdgeTarget, InputKind, InputStep, StepKind, Typebot};

pub const SAMPLE_MESSAGE: &str = "This is a sample result, it has been generated ⬇️";

/// One column of a typebot's results table.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCell {
    pub label: String,
    pub variable_id: Option<String>,
    /// Input steps feeding this column, with the block each lives in.
    pub steps: Vec<(String, InputStep)>,
}

/// Build the results-table header: one cell per variable-bound input (shared
/// by inputs bound to the same variable), one per unbound input labelled by
/// its block title, then one per variable no input writes to.
pub fn result_header(typebot: &Typebot) -> Vec<HeaderCell> {
    let mut cells: Vec<HeaderCell> = Vec::new();
    let mut title_counts: HashMap<&str, usize> = HashMap::new();

    for block in &typebot.blocks {
        for step in &block.steps {
            let StepKind::Input { input } = &step.kind else {
                continue;
            };
            let entry = (block.id.clone(), input.clone());
            let variable = input
                .variable_id
                .as_deref()
                .and_then(|id| typebot.variable(id));

            if let Some(variable) = variable {
                match cells
                    .iter_mut()
                    .find(|c| c.variable_id.as_deref() == Some(variable.id.as_str()))
                {
                    Some(cell) => cell.steps.push(entry),
                    None => cells.push(HeaderCell {
                        label: variable.name.clone(),
                        variable_id: Some(variable.id.clone()),
                        steps: vec![entry],
                    }),
                }
                continue;
            }

            let count = title_counts.entry(block.title.as_str()).or_insert(0);
            *count += 1;
            let label = if *count == 1 {
                block.title.clone()
            } else {
                format!("{} ({})", block.title, count)
            };
            cells.push(HeaderCell {
                label,
                variable_id: None,
                steps: vec![entry],
            });
        }
    }

    for variable in &typebot.variables {
        if !cells
            .iter()
            .any(|c| c.variable_id.as_deref() == Some(variable.id.as_str()))
        {
            cells.push(HeaderCell {
                label: variable.name.clone(),
                variable_id: Some(variable.id.clone()),
                steps: Vec::new(),
            });
        }
    }
    cells
}

/// Blocks from which `block_id` can be reached by following edges, including
/// `block_id` itself.
pub fn ancestor_blocks(typebot: &Typebot, block_id: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &typebot.edges {
        if let EdgeTarget::Block { block_id: to, .. } = &edge.to {
            incoming
                .entry(to.as_str())
                .or_default()
                .push(edge.from.block_id.as_str());
        }
    }

    let mut seen = HashSet::from([block_id.to_string()]);
    let mut queue = VecDeque::from([block_id]);
    while let Some(current) = queue.pop_front() {
        for &source in incoming.get(current).into_iter().flatten() {
            if seen.insert(source.to_string()) {
                queue.push_back(source);
            }
        }
    }
    seen
}

/// Sample webhook payload for a step: the answers a conversation reaching that
/// step could have collected, filled with placeholder values.
pub fn sample_result(typebot: &Typebot, step_id: &str) -> Result<Map<String, Value>> {
    let step = typebot
        .find_step(step_id)
        .ok_or_else(|| FlowError::StepNotFound(step_id.to_string()))?;
    let reachable = ancestor_blocks(typebot, &step.block_id);

    let mut result = Map::new();
    result.insert("message".into(), Value::String(SAMPLE_MESSAGE.into()));
    result.insert("Submitted at".into(), Value::String(Utc::now().to_rfc3339()));

    for cell in result_header(typebot) {
        let answered = cell
            .steps
            .iter()
            .find(|(block_id, _)| reachable.contains(block_id));
        match (answered, &cell.variable_id) {
            (Some((_, input)), _) => {
                result.insert(cell.label, Value::String(sample_value(input)));
            }
            (None, Some(_)) => {
                result.insert(cell.label, Value::String("content".into()));
            }
            (None, None) => {}
        }
    }
    Ok(result)
}

/// A plausible answer for an input kind.
pub fn sample_value(input: &InputStep) -> String {
    match &input.kind {
        InputKind::Choice {
            items,
            is_multiple_choice,
        } => {
            if *is_multiple_choice {
                let joined = items
                    .iter()
                    .map(|i| i.content.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                if joined.is_empty() {
                    "Item".to_string()
                } else {
                    joined
                }
            } else {
                items
                    .first()
                    .map(|i| i.content.clone())
                    .unwrap_or_else(|| "Item".to_string())
            }
        }
        InputKind::Date => Utc::now().date_naive().to_string(),
        InputKind::Email => "test@email.com".to_string(),
        InputKind::Number => "20".to_string(),
        InputKind::Phone => "+33665566773".to_string(),
        InputKind::Text { .. } => "answer value".to_string(),
        InputKind::Url => "https://test.com".to_string(),
    }
}
