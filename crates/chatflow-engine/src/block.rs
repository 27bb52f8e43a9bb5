use tracing::debug;

use chatflow_core::context::LinkedTypebot;
use chatflow_core::error::{FlowError, Result};
use chatflow_core::traits::EdgeFactory;
use chatflow_core::variables::Answer;
use chatflow_core::{Block, Step, VariableStore};

use crate::chunk::{self, Chunk};
use crate::executor::{action_for, choice_edge, parse_retry_step, StepAction};

/// Events that move a block instance forward.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockEvent {
    /// Make a step current (appends it to the visited sequence).
    StepBecameCurrent(Step),
    /// The current bubble finished displaying, or the current logic or
    /// integration step resolved.
    StepSettled {
        next_edge_id: Option<String>,
        linked_typebot: Option<LinkedTypebot>,
    },
    /// The user answered the current input.
    AnswerSubmitted(String),
    /// The surface rejected the answer to the current input.
    RetryRequested,
}

impl BlockEvent {
    /// A settlement that carries no branching decision.
    pub fn settled() -> Self {
        BlockEvent::StepSettled {
            next_edge_id: None,
            linked_typebot: None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BlockEvent::StepBecameCurrent(_) => "step became current",
            BlockEvent::StepSettled { .. } => "step settled",
            BlockEvent::AnswerSubmitted(_) => "answer submitted",
            BlockEvent::RetryRequested => "retry requested",
        }
    }
}

/// How a block instance finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockEnd {
    /// The edge to follow. When `linked_typebot` is set this is the edge
    /// pending at the point of injection, to resume once the link returns.
    pub edge_id: Option<String>,
    pub linked_typebot: Option<LinkedTypebot>,
}

/// What the block needs next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Display this bubble and report `StepSettled` once it is shown.
    Display(Step),
    /// Wait for `AnswerSubmitted` or `RetryRequested`.
    AwaitAnswer(Step),
    /// Run this logic or integration step and report `StepSettled`.
    Execute(Step),
    /// The block instance is done.
    End(BlockEnd),
}

/// Collaborators a block touches while settling steps.
pub struct BlockEnv<'a> {
    pub variables: &'a mut VariableStore,
    pub edges: &'a mut dyn EdgeFactory,
}

/// Drives one block instance, one current step at a time.
///
/// The controller is a reducer over [`BlockEvent`]s: it records every step
/// that becomes current, keeps the chunk list in sync, and terminates exactly
/// once with a [`BlockEnd`].
#[derive(Debug, Clone)]
pub struct BlockController {
    block_id: String,
    steps: Vec<Step>,
    start_index: usize,
    visited: Vec<Step>,
    chunks: Vec<Chunk>,
    finished: bool,
}

impl BlockController {
    pub fn new(block: &Block, start_index: usize) -> Self {
        Self {
            block_id: block.id.clone(),
            steps: block.steps.clone(),
            start_index,
            visited: Vec::new(),
            chunks: Vec::new(),
            finished: false,
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Make the step at the start offset current.
    pub fn start(&mut self) -> Directive {
        match self.steps.get(self.start_index).cloned() {
            Some(step) => self.make_current(step),
            None => self.finish(None, None),
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: BlockEvent, env: &mut BlockEnv<'_>) -> Result<Directive> {
        if self.finished {
            return Err(FlowError::BlockFinished);
        }
        if let BlockEvent::StepBecameCurrent(step) = event {
            return Ok(self.make_current(step));
        }

        let current = self
            .visited
            .last()
            .cloned()
            .ok_or_else(|| self.unexpected("a current step", &event))?;

        match (action_for(&current), event) {
            (
                StepAction::Display | StepAction::Execute,
                BlockEvent::StepSettled {
                    next_edge_id,
                    linked_typebot,
                },
            ) => {
                if linked_typebot.is_some() {
                    return Ok(self.finish(current.outgoing_edge_id.clone(), linked_typebot));
                }
                if next_edge_id.is_some() {
                    return Ok(self.finish(next_edge_id, None));
                }
                Ok(self.advance(&current))
            }
            (StepAction::AwaitAnswer, BlockEvent::AnswerSubmitted(content)) => {
                let Some(input) = current.input() else {
                    return Err(FlowError::StepNotFound(current.id.clone()));
                };
                if let Some(variable_id) = &input.variable_id {
                    if !content.is_empty() {
                        env.variables.update_variable_value(variable_id, content.clone());
                    }
                }
                env.variables.record_answer(Answer {
                    block_id: current.block_id.clone(),
                    step_id: current.id.clone(),
                    variable_id: input.variable_id.clone(),
                    content: content.clone(),
                });
                if let Some(edge_id) = choice_edge(input, &content) {
                    return Ok(self.finish(Some(edge_id), None));
                }
                Ok(self.advance(&current))
            }
            (StepAction::AwaitAnswer, BlockEvent::RetryRequested) => {
                match parse_retry_step(&current, env.variables, env.edges) {
                    Some(retry) => {
                        debug!(step_id = %current.id, "Retrying input");
                        Ok(self.make_current(retry))
                    }
                    None => Ok(Directive::AwaitAnswer(current)),
                }
            }
            (action, event) => {
                let expected = match action {
                    StepAction::AwaitAnswer => "answer submitted or retry requested",
                    _ => "step settled",
                };
                Err(self.unexpected(expected, &event))
            }
        }
    }

    /// The step awaiting settlement.
    pub fn current(&self) -> Option<&Step> {
        if self.finished {
            None
        } else {
            self.visited.last()
        }
    }

    pub fn visited(&self) -> &[Step] {
        &self.visited
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn make_current(&mut self, step: Step) -> Directive {
        debug!(block_id = %self.block_id, step_id = %step.id, kind = step.kind.name(), "Step became current");
        self.visited.push(step.clone());
        self.chunks = chunk::append(std::mem::take(&mut self.chunks), &step);
        match action_for(&step) {
            StepAction::Complete(edge_id) => self.finish(edge_id, None),
            StepAction::Display => Directive::Display(step),
            StepAction::AwaitAnswer => Directive::AwaitAnswer(step),
            StepAction::Execute => Directive::Execute(step),
        }
    }

    /// Default sequencing after a step settles without branching.
    fn advance(&mut self, current: &Step) -> Directive {
        if current.outgoing_edge_id.is_some() {
            return self.finish(current.outgoing_edge_id.clone(), None);
        }
        match self.steps.get(self.start_index + self.visited.len()).cloned() {
            Some(next) => self.make_current(next),
            None => self.finish(None, None),
        }
    }

    fn finish(&mut self, edge_id: Option<String>, linked_typebot: Option<LinkedTypebot>) -> Directive {
        debug!(block_id = %self.block_id, edge_id = ?edge_id, linked = linked_typebot.is_some(), "Block finished");
        self.finished = true;
        Directive::End(BlockEnd {
            edge_id,
            linked_typebot,
        })
    }

    fn unexpected(&self, expected: &str, event: &BlockEvent) -> FlowError {
        FlowError::UnexpectedEvent {
            expected: expected.to_string(),
            got: event.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatflow_core::context::LinkedTypebot;
    use chatflow_core::{EdgeTarget, Variable};
    use chatflow_test_utils::fixtures::*;
    use chatflow_test_utils::RecordingEdges;

    struct Harness {
        variables: VariableStore,
        edges: RecordingEdges,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                variables: VariableStore::from_variables(&[Variable::new("V", "Mood")]),
                edges: RecordingEdges::default(),
            }
        }

        fn apply(&mut self, block: &mut BlockController, event: BlockEvent) -> Directive {
            let mut env = BlockEnv {
                variables: &mut self.variables,
                edges: &mut self.edges,
            };
            block.apply(event, &mut env).unwrap()
        }
    }

    fn end(edge: Option<&str>) -> Directive {
        Directive::End(BlockEnd {
            edge_id: edge.map(str::to_string),
            linked_typebot: None,
        })
    }

    #[test]
    fn test_greeting_scenario() {
        let b = block(
            "b1",
            vec![
                text_bubble("s1", "b1", "Hi"),
                text_bubble("s2", "b1", "How are you?"),
                bind(text_input("s3", "b1"), "V").with_edge("E1"),
            ],
        );
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);

        assert!(matches!(controller.start(), Directive::Display(ref s) if s.id == "s1"));
        assert!(matches!(h.apply(&mut controller, BlockEvent::settled()), Directive::Display(ref s) if s.id == "s2"));
        assert!(matches!(h.apply(&mut controller, BlockEvent::settled()), Directive::AwaitAnswer(ref s) if s.id == "s3"));

        assert_eq!(controller.chunks().len(), 1);
        let chunk = &controller.chunks()[0];
        assert_eq!(chunk.bubbles.len(), 2);
        assert_eq!(chunk.bubbles[0].id, "s1");
        assert_eq!(chunk.bubbles[1].id, "s2");
        assert_eq!(chunk.input.as_ref().unwrap().id, "s3");

        let directive = h.apply(&mut controller, BlockEvent::AnswerSubmitted("good".into()));
        assert_eq!(directive, end(Some("E1")));
        assert_eq!(h.variables.value("V"), Some("good"));
        assert_eq!(h.variables.answers().len(), 1);
        assert!(controller.is_finished());
    }

    #[test]
    fn test_visits_in_order_and_ends_once() {
        let b = block(
            "b1",
            vec![
                text_bubble("s0", "b1", "a"),
                text_bubble("s1", "b1", "b"),
                text_bubble("s2", "b1", "c").with_edge("out"),
            ],
        );
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        let mut directive = controller.start();
        let mut ends = 0;
        loop {
            match directive {
                Directive::Display(_) => directive = h.apply(&mut controller, BlockEvent::settled()),
                Directive::End(end) => {
                    ends += 1;
                    assert_eq!(end.edge_id.as_deref(), Some("out"));
                    break;
                }
                other => panic!("unexpected directive {:?}", other),
            }
        }
        assert_eq!(ends, 1);
        let visited: Vec<&str> = controller.visited().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(visited, vec!["s0", "s1", "s2"]);

        let mut env = BlockEnv {
            variables: &mut h.variables,
            edges: &mut h.edges,
        };
        assert!(matches!(
            controller.apply(BlockEvent::settled(), &mut env),
            Err(FlowError::BlockFinished)
        ));
    }

    #[test]
    fn test_last_step_without_edge_ends_with_none() {
        let b = block("b1", vec![text_bubble("s0", "b1", "bye")]);
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        assert_eq!(h.apply(&mut controller, BlockEvent::settled()), end(None));
    }

    #[test]
    fn test_start_offset() {
        let b = block(
            "b1",
            vec![
                text_bubble("s0", "b1", "skipped"),
                text_input("s1", "b1"),
                text_bubble("s2", "b1", "after"),
            ],
        );
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 1);
        assert!(matches!(controller.start(), Directive::AwaitAnswer(ref s) if s.id == "s1"));
        assert!(matches!(
            h.apply(&mut controller, BlockEvent::AnswerSubmitted("x".into())),
            Directive::Display(ref s) if s.id == "s2"
        ));
        assert_eq!(h.apply(&mut controller, BlockEvent::settled()), end(None));
    }

    #[test]
    fn test_start_offset_past_end() {
        let b = block("b1", vec![text_bubble("s0", "b1", "a")]);
        let mut controller = BlockController::new(&b, 3);
        assert_eq!(controller.start(), end(None));
    }

    #[test]
    fn test_start_step_completes_immediately() {
        let b = block("b0", vec![start_step("s0", "b0", Some("e0"))]);
        let mut controller = BlockController::new(&b, 0);
        assert_eq!(controller.start(), end(Some("e0")));
        assert!(controller.chunks().is_empty());
    }

    fn yes_no_block(own_edge: Option<&str>, trailing: bool) -> Block {
        let mut input = choice_input("c", "b1", &[("Yes", Some("E1")), ("No", Some("E2"))]);
        input.outgoing_edge_id = own_edge.map(str::to_string);
        let mut steps = vec![input];
        if trailing {
            steps.push(text_bubble("after", "b1", "next"));
        }
        block("b1", steps)
    }

    #[test]
    fn test_choice_routes_to_item_edge() {
        for (answer, expected) in [("Yes", "E1"), ("No", "E2")] {
            let mut h = Harness::new();
            let mut controller = BlockController::new(&yes_no_block(None, true), 0);
            controller.start();
            assert_eq!(
                h.apply(&mut controller, BlockEvent::AnswerSubmitted(answer.into())),
                end(Some(expected))
            );
        }
    }

    #[test]
    fn test_unmatched_choice_uses_own_edge() {
        let mut h = Harness::new();
        let mut controller = BlockController::new(&yes_no_block(Some("OWN"), true), 0);
        controller.start();
        assert_eq!(
            h.apply(&mut controller, BlockEvent::AnswerSubmitted("Maybe".into())),
            end(Some("OWN"))
        );
    }

    #[test]
    fn test_unmatched_choice_falls_through() {
        let mut h = Harness::new();
        let mut controller = BlockController::new(&yes_no_block(None, true), 0);
        controller.start();
        assert!(matches!(
            h.apply(&mut controller, BlockEvent::AnswerSubmitted("Maybe".into())),
            Directive::Display(ref s) if s.id == "after"
        ));
    }

    #[test]
    fn test_unmatched_choice_on_last_step_ends_block() {
        let mut h = Harness::new();
        let mut controller = BlockController::new(&yes_no_block(None, false), 0);
        controller.start();
        assert_eq!(
            h.apply(&mut controller, BlockEvent::AnswerSubmitted("Maybe".into())),
            end(None)
        );
    }

    #[test]
    fn test_empty_answer_does_not_write_variable() {
        let b = block("b1", vec![bind(text_input("i", "b1"), "V")]);
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        h.apply(&mut controller, BlockEvent::AnswerSubmitted(String::new()));
        assert_eq!(h.variables.value("V"), None);
    }

    #[test]
    fn test_logic_settlement() {
        let b = block(
            "b1",
            vec![
                set_variable("l1", "b1", "V", "x"),
                set_variable("l2", "b1", "V", "y").with_edge("OWN"),
                text_bubble("s", "b1", "unreached"),
            ],
        );
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        assert!(matches!(controller.start(), Directive::Execute(ref s) if s.id == "l1"));
        // No edge: fall through.
        assert!(matches!(
            h.apply(&mut controller, BlockEvent::settled()),
            Directive::Execute(ref s) if s.id == "l2"
        ));
        // No edge but the step has its own: follow it.
        assert_eq!(h.apply(&mut controller, BlockEvent::settled()), end(Some("OWN")));
    }

    #[test]
    fn test_logic_branch_edge_wins() {
        let b = block("b1", vec![set_variable("l1", "b1", "V", "x").with_edge("OWN")]);
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        let directive = h.apply(
            &mut controller,
            BlockEvent::StepSettled {
                next_edge_id: Some("BRANCH".into()),
                linked_typebot: None,
            },
        );
        assert_eq!(directive, end(Some("BRANCH")));
    }

    #[test]
    fn test_linked_typebot_ends_with_pending_edge() {
        let b = block("b1", vec![typebot_link("l1", "b1", "other", None).with_edge("RETURN")]);
        let linked = LinkedTypebot {
            typebot: Arc::new(TypebotBuilder::new("other").build()),
            block_id: None,
        };
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        let directive = h.apply(
            &mut controller,
            BlockEvent::StepSettled {
                next_edge_id: None,
                linked_typebot: Some(linked.clone()),
            },
        );
        assert_eq!(
            directive,
            Directive::End(BlockEnd {
                edge_id: Some("RETURN".into()),
                linked_typebot: Some(linked),
            })
        );
    }

    #[test]
    fn test_retry_synthesises_bubble_back_to_input() {
        let b = block(
            "b1",
            vec![
                text_bubble("s0", "b1", "Your email?"),
                email_input("mail", "b1", "That is not an email."),
            ],
        );
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        h.apply(&mut controller, BlockEvent::settled());

        let directive = h.apply(&mut controller, BlockEvent::RetryRequested);
        let retry = match directive {
            Directive::Display(step) => step,
            other => panic!("expected retry bubble, got {:?}", other),
        };
        assert_eq!(controller.chunks().len(), 2);
        assert_eq!(controller.chunks()[1].bubbles[0].id, retry.id);

        let created = h.edges.created[0].clone();
        assert_eq!(
            created.to,
            EdgeTarget::Block {
                block_id: "b1".into(),
                step_id: Some("mail".into())
            }
        );
        assert_eq!(
            h.apply(&mut controller, BlockEvent::settled()),
            end(Some(created.id.as_str()))
        );
    }

    #[test]
    fn test_retry_on_non_retriable_input_keeps_waiting() {
        let b = block("b1", vec![text_input("i", "b1")]);
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        assert!(matches!(
            h.apply(&mut controller, BlockEvent::RetryRequested),
            Directive::AwaitAnswer(ref s) if s.id == "i"
        ));
        assert_eq!(controller.visited().len(), 1);
    }

    #[test]
    fn test_unexpected_events_are_rejected() {
        let b = block("b1", vec![text_bubble("s0", "b1", "a"), text_input("i", "b1")]);
        let mut h = Harness::new();
        let mut controller = BlockController::new(&b, 0);
        controller.start();
        let mut env = BlockEnv {
            variables: &mut h.variables,
            edges: &mut h.edges,
        };
        let err = controller
            .apply(BlockEvent::AnswerSubmitted("x".into()), &mut env)
            .unwrap_err();
        assert!(matches!(err, FlowError::UnexpectedEvent { ref got, .. } if got == "answer submitted"));

        controller.apply(BlockEvent::settled(), &mut env).unwrap();
        let err = controller.apply(BlockEvent::settled(), &mut env).unwrap_err();
        assert!(matches!(err, FlowError::UnexpectedEvent { ref expected, .. } if expected.starts_with("answer")));
    }
}
