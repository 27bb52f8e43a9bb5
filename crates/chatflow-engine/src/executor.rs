use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chatflow_core::context::{IntegrationContext, LogicContext, LogicOutcome, StagedEffects};
use chatflow_core::log::LogEntry;
use chatflow_core::traits::{EdgeFactory, IntegrationExecutor, LogSink, LogicExecutor};
use chatflow_core::types::generate_id;
use chatflow_core::{
    Bubble, EdgeSource, EdgeTarget, InputKind, InputStep, IntegrationStep, LogicStep, Step,
    StepKind, VariableStore,
};

/// What happens when a step becomes current.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Finish the block immediately on this edge (start steps).
    Complete(Option<String>),
    /// Show it and wait for the surface to report it settled.
    Display,
    /// Show it and wait for an answer or a retry signal.
    AwaitAnswer,
    /// Run it asynchronously through an executor.
    Execute,
}

pub fn action_for(step: &Step) -> StepAction {
    match &step.kind {
        StepKind::Start => StepAction::Complete(step.outgoing_edge_id.clone()),
        StepKind::Bubble { .. } => StepAction::Display,
        StepKind::Input { .. } => StepAction::AwaitAnswer,
        StepKind::Logic { .. } | StepKind::Integration { .. } => StepAction::Execute,
    }
}

/// The branch a single-choice answer selects, if any item matches it.
pub fn choice_edge(input: &InputStep, answer: &str) -> Option<String> {
    if !input.is_single_choice() {
        return None;
    }
    match &input.kind {
        InputKind::Choice { items, .. } => items
            .iter()
            .find(|item| item.content == answer)
            .and_then(|item| item.outgoing_edge_id.clone()),
        _ => None,
    }
}

/// Build the retry variant of an input step.
///
/// The variant is a text bubble carrying the retry message. Its outgoing edge
/// is freshly created and leads back into the same block at the input, so the
/// host re-enters the block there and the input is asked again.
pub fn parse_retry_step(
    step: &Step,
    variables: &VariableStore,
    edges: &mut dyn EdgeFactory,
) -> Option<Step> {
    let message = step.input()?.retry_message.as_deref()?;
    let retry_id = format!("{}-retry-{}", step.id, generate_id());
    let edge_id = edges.create_edge(
        EdgeSource {
            block_id: step.block_id.clone(),
            step_id: Some(retry_id.clone()),
            item_id: None,
        },
        EdgeTarget::Block {
            block_id: step.block_id.clone(),
            step_id: Some(step.id.clone()),
        },
    );
    Some(Step {
        id: retry_id,
        block_id: step.block_id.clone(),
        outgoing_edge_id: Some(edge_id),
        kind: StepKind::Bubble {
            bubble: Bubble::Text {
                content: variables.parse(message),
            },
        },
    })
}

/// A resolved asynchronous step: its branching outcome and the effects to commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    pub outcome: LogicOutcome,
    pub effects: StagedEffects,
}

/// Runs logic and integration steps through their executors.
///
/// Executor failures are logged and settle as "no next edge". Cancellation
/// wins over a pending call: the call is dropped and nothing is returned.
pub struct StepExecutor {
    logic: Arc<dyn LogicExecutor>,
    integration: Arc<dyn IntegrationExecutor>,
    log: Arc<dyn LogSink>,
}

impl StepExecutor {
    pub fn new(
        logic: Arc<dyn LogicExecutor>,
        integration: Arc<dyn IntegrationExecutor>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            logic,
            integration,
            log,
        }
    }

    /// Run a logic step. Returns `None` if cancelled before it resolved.
    pub async fn run_logic(
        &self,
        step: &Step,
        logic: &LogicStep,
        mut ctx: LogicContext,
        cancel: &CancellationToken,
    ) -> Option<Settlement> {
        debug!(step_id = %step.id, "Executing logic step");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.logic.execute(step, logic, &mut ctx) => result,
        };
        if cancel.is_cancelled() {
            return None;
        }
        match result {
            Ok(outcome) => Some(Settlement {
                outcome,
                effects: ctx.into_effects(),
            }),
            Err(e) => {
                self.report_failure(step, "Logic", &e.to_string());
                Some(Settlement::default())
            }
        }
    }

    /// Run an integration step. Returns `None` if cancelled before it resolved.
    pub async fn run_integration(
        &self,
        step: &Step,
        integration: &IntegrationStep,
        mut ctx: IntegrationContext,
        cancel: &CancellationToken,
    ) -> Option<Settlement> {
        debug!(step_id = %step.id, "Executing integration step");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.integration.execute(step, integration, &mut ctx) => result,
        };
        if cancel.is_cancelled() {
            return None;
        }
        match result {
            Ok(outcome) => Some(Settlement {
                outcome: LogicOutcome::next(outcome.next_edge_id),
                effects: ctx.into_effects(),
            }),
            Err(e) => {
                self.report_failure(step, "Integration", &e.to_string());
                Some(Settlement::default())
            }
        }
    }

    fn report_failure(&self, step: &Step, kind: &str, error: &str) {
        warn!(step_id = %step.id, block_id = %step.block_id, error, "{} step failed", kind);
        self.log.on_new_log(
            LogEntry::error(format!("{} step {} failed", kind, step.id)).with_details(error),
        );
    }
}
