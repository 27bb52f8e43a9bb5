use std::collections::HashSet;

use crate::typebot::{EdgeTarget, InputKind, StepKind, Typebot};

/// Validate a typebot for structural correctness.
///
/// Returns `Ok(())` if the graph is valid, or `Err(Vec<String>)` with a list
/// of human-readable problems. The engine assumes a valid graph; hosts run
/// this before handing a typebot over.
pub fn validate_typebot(typebot: &Typebot) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    // 1. No duplicate block, step or edge ids.
    let mut block_ids = HashSet::new();
    let mut step_ids = HashSet::new();
    for block in &typebot.blocks {
        if !block_ids.insert(block.id.as_str()) {
            errors.push(format!("Duplicate block ID: {}", block.id));
        }
        for step in &block.steps {
            if !step_ids.insert(step.id.as_str()) {
                errors.push(format!("Duplicate step ID: {}", step.id));
            }
            // 2. Steps agree with their owning block.
            if step.block_id != block.id {
                errors.push(format!(
                    "Step {} claims block {} but lives in block {}",
                    step.id, step.block_id, block.id
                ));
            }
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &typebot.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(format!("Duplicate edge ID: {}", edge.id));
        }
    }

    // 3. Edge endpoints reference existing blocks and steps.
    for edge in &typebot.edges {
        if !block_ids.contains(edge.from.block_id.as_str()) {
            errors.push(format!(
                "Edge {} references unknown source block: {}",
                edge.id, edge.from.block_id
            ));
        }
        if let EdgeTarget::Block { block_id, step_id } = &edge.to {
            match typebot.block(block_id) {
                None => errors.push(format!(
                    "Edge {} references unknown target block: {}",
                    edge.id, block_id
                )),
                Some(block) => {
                    if let Some(step_id) = step_id {
                        if block.step_index(step_id).is_none() {
                            errors.push(format!(
                                "Edge {} references unknown target step: {}",
                                edge.id, step_id
                            ));
                        }
                    }
                }
            }
        }
    }

    // 4. Outgoing edge ids resolve.
    let dangling = |owner: &str, edge_id: &Option<String>, errors: &mut Vec<String>| {
        if let Some(edge_id) = edge_id {
            if !edge_ids.contains(edge_id.as_str()) {
                errors.push(format!("{} points at unknown edge: {}", owner, edge_id));
            }
        }
    };
    for step in typebot.blocks.iter().flat_map(|b| b.steps.iter()) {
        dangling(&format!("Step {}", step.id), &step.outgoing_edge_id, &mut errors);
        if let StepKind::Input { input } = &step.kind {
            if let InputKind::Choice { items, .. } = &input.kind {
                for item in items {
                    dangling(&format!("Choice item {}", item.id), &item.outgoing_edge_id, &mut errors);
                }
            }
        }
        if let StepKind::Logic {
            logic: crate::typebot::LogicStep::Condition { items },
        } = &step.kind
        {
            for item in items {
                dangling(&format!("Condition item {}", item.id), &item.outgoing_edge_id, &mut errors);
            }
        }
    }

    // 5. Exactly one way in.
    if typebot.start_block().is_none() {
        errors.push("Typebot has no start step".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typebot::{Block, Bubble, Edge, EdgeSource, Step};

    fn valid() -> Typebot {
        Typebot {
            id: "t1".into(),
            name: "Valid".into(),
            blocks: vec![
                Block {
                    id: "b0".into(),
                    title: "Start".into(),
                    steps: vec![Step::new("s0", "b0", StepKind::Start).with_edge("e0")],
                },
                Block {
                    id: "b1".into(),
                    title: "Hello".into(),
                    steps: vec![Step::new(
                        "s1",
                        "b1",
                        StepKind::Bubble {
                            bubble: Bubble::Text {
                                content: "Hi".into(),
                            },
                        },
                    )],
                },
            ],
            edges: vec![Edge {
                id: "e0".into(),
                from: EdgeSource {
                    block_id: "b0".into(),
                    step_id: Some("s0".into()),
                    item_id: None,
                },
                to: EdgeTarget::block("b1"),
            }],
            variables: vec![],
            theme: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_valid_typebot() {
        assert!(validate_typebot(&valid()).is_ok());
    }

    #[test]
    fn test_unknown_target_block() {
        let mut typebot = valid();
        typebot.edges[0].to = EdgeTarget::block("missing");
        let errors = validate_typebot(&typebot).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown target block: missing")));
    }

    #[test]
    fn test_dangling_outgoing_edge() {
        let mut typebot = valid();
        typebot.blocks[1].steps[0].outgoing_edge_id = Some("nope".into());
        let errors = validate_typebot(&typebot).unwrap_err();
        assert_eq!(errors, vec!["Step s1 points at unknown edge: nope".to_string()]);
    }

    #[test]
    fn test_missing_start_and_duplicates() {
        let mut typebot = valid();
        typebot.blocks.remove(0);
        let duplicate = typebot.blocks[0].clone();
        typebot.blocks.push(duplicate);
        let errors = validate_typebot(&typebot).unwrap_err();
        assert!(errors.iter().any(|e| e == "Duplicate block ID: b1"));
        assert!(errors.iter().any(|e| e == "Duplicate step ID: s1"));
        assert!(errors.iter().any(|e| e == "Typebot has no start step"));
        assert!(errors.iter().any(|e| e.contains("unknown source block: b0")));
    }

    #[test]
    fn test_step_block_mismatch() {
        let mut typebot = valid();
        typebot.blocks[1].steps[0].block_id = "b0".into();
        let errors = validate_typebot(&typebot).unwrap_err();
        assert!(errors[0].contains("claims block b0"));
    }
}
