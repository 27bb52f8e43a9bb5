use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatflow_core::config::EngineConfig;
use chatflow_core::context::{IntegrationContext, LinkedTypebot, LogicContext, StagedEffects};
use chatflow_core::error::{FlowError, Result};
use chatflow_core::log::LogEntry;
use chatflow_core::traits::{IntegrationExecutor, LogSink, LogicExecutor, TypebotLookup};
use chatflow_core::variables::ResultValues;
use chatflow_core::{Block, ConversationId, Edge, EdgeTarget, Step, StepKind, Typebot, VariableStore};

use crate::block::{BlockController, BlockEnd, BlockEnv, BlockEvent, Directive};
use crate::chunk::Chunk;
use crate::edges::EdgeRegistry;
use crate::executor::StepExecutor;
use crate::link_stack::{LinkFrame, LinkStack};

/// What the rendering surface has to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// Show this bubble, then call [`Conversation::step_settled`].
    Display(Step),
    /// Show this input, then call [`Conversation::submit_answer`] or
    /// [`Conversation::request_retry`].
    AwaitAnswer(Step),
    /// No block is left to run.
    Completed,
}

/// A finished block instance as it was shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedBlock {
    pub typebot_id: String,
    pub block_id: String,
    pub title: String,
    pub chunks: Vec<Chunk>,
}

/// Collaborators a conversation calls out to.
#[derive(Clone)]
pub struct Services {
    pub lookup: Arc<dyn TypebotLookup>,
    pub logic: Arc<dyn LogicExecutor>,
    pub integration: Arc<dyn IntegrationExecutor>,
    pub log: Arc<dyn LogSink>,
}

impl Services {
    pub fn new(
        lookup: Arc<dyn TypebotLookup>,
        logic: Arc<dyn LogicExecutor>,
        integration: Arc<dyn IntegrationExecutor>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            lookup,
            logic,
            integration,
            log,
        }
    }
}

struct ActiveBlock {
    typebot_id: String,
    title: String,
    controller: BlockController,
}

/// One visitor's walk through a typebot and whatever it links to.
///
/// There is a single cursor: every public call moves it forward until the
/// surface is needed again (a bubble to display or an input to answer) or the
/// flow runs out of blocks.
pub struct Conversation {
    id: ConversationId,
    config: EngineConfig,
    root: Arc<Typebot>,
    current: Arc<Typebot>,
    linked: Vec<Arc<Typebot>>,
    variables: VariableStore,
    edges: EdgeRegistry,
    link_stack: LinkStack,
    active: Option<ActiveBlock>,
    history: Vec<RenderedBlock>,
    executor: StepExecutor,
    lookup: Arc<dyn TypebotLookup>,
    log: Arc<dyn LogSink>,
    cancel: CancellationToken,
    started: bool,
    completed: bool,
}

impl Conversation {
    pub fn new(typebot: Typebot, services: Services, config: EngineConfig) -> Self {
        let root = Arc::new(typebot);
        let variables = VariableStore::from_variables(&root.variables);
        Self {
            id: ConversationId::new(),
            config,
            current: root.clone(),
            root,
            linked: Vec::new(),
            variables,
            edges: EdgeRegistry::new(),
            link_stack: LinkStack::new(),
            active: None,
            history: Vec::new(),
            executor: StepExecutor::new(services.logic, services.integration, services.log.clone()),
            lookup: services.lookup,
            log: services.log,
            cancel: CancellationToken::new(),
            started: false,
            completed: false,
        }
    }

    /// Seed variable values before starting, e.g. from URL parameters.
    pub fn with_variable(mut self, variable_id: &str, value: impl Into<String>) -> Self {
        self.variables.update_variable_value(variable_id, value);
        self
    }

    /// Enter the root typebot at its start block.
    pub async fn start(&mut self) -> Result<Turn> {
        self.ensure_live("start")?;
        if self.started {
            return Err(FlowError::UnexpectedEvent {
                expected: "step settled, answer submitted or retry requested".into(),
                got: "start".into(),
            });
        }
        self.started = true;
        let root = self.root.clone();
        let block = root
            .start_block()
            .ok_or_else(|| FlowError::NoStartBlock(root.id.clone()))?;
        info!(conversation = %self.id, typebot_id = %root.id, "Conversation started");
        let directive = self.enter_block(block, 0);
        self.drive(directive).await
    }

    /// The displayed bubble finished appearing.
    pub async fn step_settled(&mut self) -> Result<Turn> {
        self.ensure_live("step settled")?;
        let directive = self.apply(BlockEvent::settled())?;
        self.drive(directive).await
    }

    /// The user answered the current input.
    pub async fn submit_answer(&mut self, content: impl Into<String>) -> Result<Turn> {
        self.ensure_live("answer submitted")?;
        let directive = self.apply(BlockEvent::AnswerSubmitted(content.into()))?;
        self.drive(directive).await
    }

    /// The surface rejected the answer to the current input.
    pub async fn request_retry(&mut self) -> Result<Turn> {
        self.ensure_live("retry requested")?;
        let directive = self.apply(BlockEvent::RetryRequested)?;
        self.drive(directive).await
    }

    /// Abandon the conversation. Any executor call in flight is dropped and
    /// its effects discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this conversation, for surfaces that need to cancel
    /// while a call is pending.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Chunks of the block instance in progress.
    pub fn chunks(&self) -> &[Chunk] {
        self.active
            .as_ref()
            .map(|a| a.controller.chunks())
            .unwrap_or_default()
    }

    /// The step awaiting settlement, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.active.as_ref().and_then(|a| a.controller.current())
    }

    /// Finished block instances, oldest first.
    pub fn history(&self) -> &[RenderedBlock] {
        &self.history
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn result_values(&self) -> ResultValues {
        self.variables.current_values()
    }

    pub fn current_typebot_id(&self) -> &str {
        &self.current.id
    }

    /// Number of typebot links waiting to return.
    pub fn link_depth(&self) -> usize {
        self.link_stack.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn ensure_live(&self, event: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        if self.completed {
            return Err(FlowError::UnexpectedEvent {
                expected: "an active conversation".into(),
                got: event.into(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, event: BlockEvent) -> Result<Directive> {
        let active = self.active.as_mut().ok_or(FlowError::BlockFinished)?;
        let mut env = BlockEnv {
            variables: &mut self.variables,
            edges: &mut self.edges,
        };
        active.controller.apply(event, &mut env)
    }

    async fn drive(&mut self, mut directive: Directive) -> Result<Turn> {
        let mut transitions = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            directive = match directive {
                Directive::Display(step) => return Ok(Turn::Display(step)),
                Directive::AwaitAnswer(step) => return Ok(Turn::AwaitAnswer(step)),
                Directive::Execute(step) => {
                    let event = self.execute(&step).await?;
                    self.apply(event)?
                }
                Directive::End(end) => {
                    transitions += 1;
                    if transitions > self.config.max_auto_transitions {
                        warn!(conversation = %self.id, transitions, "Stopping runaway flow");
                        return Err(FlowError::LoopDetected(self.config.max_auto_transitions));
                    }
                    match self.on_block_end(end).await? {
                        Some(next) => next,
                        None => {
                            self.finish();
                            return Ok(Turn::Completed);
                        }
                    }
                }
            };
        }
    }

    /// Run a logic or integration step and turn its result into a settlement.
    async fn execute(&mut self, step: &Step) -> Result<BlockEvent> {
        let settlement = match &step.kind {
            StepKind::Logic { logic } => {
                let ctx = LogicContext::new(
                    self.current.clone(),
                    self.variables.clone(),
                    self.lookup.clone(),
                    self.log.clone(),
                )
                .with_preview(self.config.is_preview)
                .with_api_host(self.config.api_host.clone())
                .with_linked_typebots(self.linked.clone());
                self.executor.run_logic(step, logic, ctx, &self.cancel).await
            }
            StepKind::Integration { integration } => {
                let ctx = IntegrationContext::new(
                    self.current.clone(),
                    step.block_id.clone(),
                    step.id.clone(),
                    self.variables.clone(),
                    self.log.clone(),
                )
                .with_preview(self.config.is_preview)
                .with_api_host(self.config.api_host.clone());
                self.executor
                    .run_integration(step, integration, ctx, &self.cancel)
                    .await
            }
            other => {
                return Err(FlowError::UnexpectedEvent {
                    expected: "logic or integration step".into(),
                    got: other.name().into(),
                })
            }
        };
        let settlement = settlement.ok_or(FlowError::Cancelled)?;
        self.commit(settlement.effects);
        Ok(BlockEvent::StepSettled {
            next_edge_id: settlement.outcome.next_edge_id,
            linked_typebot: settlement.outcome.linked_typebot,
        })
    }

    fn commit(&mut self, effects: StagedEffects) {
        if effects.is_empty() {
            return;
        }
        debug!(
            writes = effects.variable_updates.len(),
            edges = effects.edges.len(),
            "Committing step effects"
        );
        self.variables.update_variables(effects.variable_updates);
        self.edges.extend(effects.edges);
    }

    /// Resolve where to go once a block instance ends. `None` means the
    /// conversation is over.
    async fn on_block_end(&mut self, end: BlockEnd) -> Result<Option<Directive>> {
        self.archive_active();
        if let Some(linked) = end.linked_typebot {
            if let Some(directive) = self.enter_linked(linked, end.edge_id.clone()) {
                return Ok(Some(directive));
            }
        }
        self.follow(end.edge_id).await
    }

    fn enter_linked(&mut self, linked: LinkedTypebot, return_edge_id: Option<String>) -> Option<Directive> {
        let typebot = linked.typebot;
        let entry = match &linked.block_id {
            Some(block_id) => typebot.block(block_id),
            None => typebot.start_block(),
        };
        let Some(entry) = entry else {
            warn!(typebot_id = %typebot.id, block_id = ?linked.block_id, "Linked typebot has no entry block");
            self.log.on_new_log(
                LogEntry::error("Failed to link typebot")
                    .with_details(format!("Typebot {} has no block to enter", typebot.id)),
            );
            return None;
        };

        self.link_stack.push(LinkFrame {
            return_edge_id,
            typebot_id: self.current.id.clone(),
        });
        info!(
            from = %self.current.id,
            to = %typebot.id,
            depth = self.link_stack.len(),
            "Entering linked typebot"
        );
        self.switch_to(typebot.clone());
        Some(self.enter_block(entry, 0))
    }

    /// Follow an edge, popping finished links while nothing resolves.
    async fn follow(&mut self, mut edge_id: Option<String>) -> Result<Option<Directive>> {
        loop {
            if let Some(edge) = edge_id.as_deref().and_then(|id| self.resolve_edge(id)) {
                return self.enter_target(edge).await;
            }
            if let Some(id) = &edge_id {
                warn!(edge_id = %id, typebot_id = %self.current.id, "Edge does not resolve");
            }
            let Some(frame) = self.link_stack.pop() else {
                return Ok(None);
            };
            let caller = self
                .known_typebot(&frame.typebot_id)
                .ok_or_else(|| FlowError::TypebotNotFound(frame.typebot_id.clone()))?;
            info!(from = %self.current.id, to = %caller.id, "Returning from linked typebot");
            self.current = caller;
            edge_id = frame.return_edge_id;
        }
    }

    fn resolve_edge(&self, edge_id: &str) -> Option<Edge> {
        self.current
            .edge(edge_id)
            .or_else(|| self.edges.get(edge_id))
            .cloned()
    }

    async fn enter_target(&mut self, edge: Edge) -> Result<Option<Directive>> {
        match edge.to {
            EdgeTarget::Block { block_id, step_id } => {
                let typebot = self.current.clone();
                let Some(block) = typebot.block(&block_id) else {
                    warn!(edge_id = %edge.id, block_id = %block_id, "Edge targets a missing block");
                    return Ok(None);
                };
                let index = step_id
                    .as_deref()
                    .and_then(|id| block.step_index(id))
                    .unwrap_or(0);
                Ok(Some(self.enter_block(block, index)))
            }
            EdgeTarget::Typebot {
                typebot_id,
                block_id,
            } => {
                let Some(typebot) = self.load_typebot(&typebot_id).await else {
                    self.log.on_new_log(
                        LogEntry::error("Failed to jump to typebot")
                            .with_details(format!("Typebot {} not found", typebot_id)),
                    );
                    return Ok(None);
                };
                let entry = match &block_id {
                    Some(id) => typebot.block(id),
                    None => typebot.start_block(),
                };
                let Some(entry) = entry else {
                    warn!(typebot_id = %typebot_id, block_id = ?block_id, "Jump target has no entry block");
                    return Ok(None);
                };
                debug!(edge_id = %edge.id, typebot_id = %typebot.id, "Jumping to typebot");
                self.switch_to(typebot.clone());
                Ok(Some(self.enter_block(entry, 0)))
            }
        }
    }

    /// Make `typebot` the active graph and share its variables.
    fn switch_to(&mut self, typebot: Arc<Typebot>) {
        self.variables.register(&typebot.variables);
        if self.known_typebot(&typebot.id).is_none() {
            self.linked.push(typebot.clone());
        }
        self.current = typebot;
    }

    fn known_typebot(&self, typebot_id: &str) -> Option<Arc<Typebot>> {
        std::iter::once(&self.root)
            .chain(self.linked.iter())
            .find(|t| t.id == typebot_id)
            .cloned()
    }

    async fn load_typebot(&self, typebot_id: &str) -> Option<Arc<Typebot>> {
        if let Some(known) = self.known_typebot(typebot_id) {
            return Some(known);
        }
        match self.lookup.get_typebot(typebot_id).await {
            Ok(found) => found.map(Arc::new),
            Err(e) => {
                warn!(typebot_id, error = %e, "Typebot lookup failed");
                None
            }
        }
    }

    fn enter_block(&mut self, block: &Block, start_index: usize) -> Directive {
        debug!(typebot_id = %self.current.id, block_id = %block.id, start_index, "Entering block");
        let mut controller = BlockController::new(block, start_index);
        let directive = controller.start();
        self.active = Some(ActiveBlock {
            typebot_id: self.current.id.clone(),
            title: block.title.clone(),
            controller,
        });
        directive
    }

    fn archive_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let block_id = active.controller.block_id().to_string();
        let chunks = active.controller.into_chunks();
        if !chunks.is_empty() {
            self.history.push(RenderedBlock {
                typebot_id: active.typebot_id,
                block_id,
                title: active.title,
                chunks,
            });
        }
    }

    fn finish(&mut self) {
        self.archive_active();
        self.completed = true;
        info!(conversation = %self.id, blocks = self.history.len(), "Conversation completed");
    }
}
