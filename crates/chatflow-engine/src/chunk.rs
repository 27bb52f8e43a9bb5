use serde::Serialize;

use chatflow_core::{Step, StepKind};

/// One visually grouped message burst: a run of bubbles and at most one
/// trailing input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Chunk {
    pub bubbles: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Step>,
}

/// Fold one visited step into the chunk list.
///
/// Bubbles join the last chunk while it has no input; inputs attach to a
/// last chunk that lacks one and otherwise open a chunk of their own. Start,
/// logic and integration steps leave the list untouched.
pub fn append(mut chunks: Vec<Chunk>, step: &Step) -> Vec<Chunk> {
    match &step.kind {
        StepKind::Bubble { .. } => match chunks.last_mut() {
            Some(last) if last.input.is_none() => last.bubbles.push(step.clone()),
            _ => chunks.push(Chunk {
                bubbles: vec![step.clone()],
                input: None,
            }),
        },
        StepKind::Input { .. } => match chunks.last_mut() {
            Some(last) if last.input.is_none() => last.input = Some(step.clone()),
            _ => chunks.push(Chunk {
                bubbles: Vec::new(),
                input: Some(step.clone()),
            }),
        },
        StepKind::Start | StepKind::Logic { .. } | StepKind::Integration { .. } => {}
    }
    chunks
}

/// Rebuild the chunk list from a full visited-step sequence.
pub fn build(visited: &[Step]) -> Vec<Chunk> {
    visited.iter().fold(Vec::new(), append)
}
