//! Execution-context bundles handed to logic and integration executors.
//!
//! Executors never touch the conversation directly. Reads go through a
//! working copy of the variable store; writes and created edges are staged in
//! the context and committed by the engine only after the call resolves, so a
//! call abandoned mid-flight leaves no trace.

use std::sync::Arc;

use crate::log::LogEntry;
use crate::traits::{EdgeFactory, LogSink, TypebotLookup};
use crate::typebot::{Block, Edge, EdgeSource, EdgeTarget, Typebot};
use crate::types::generate_id;
use crate::variables::{ResultValues, VariableStore, VariableUpdate};

/// Writes and edges produced by one executor call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedEffects {
    pub variable_updates: Vec<VariableUpdate>,
    pub edges: Vec<Edge>,
}

impl StagedEffects {
    pub fn is_empty(&self) -> bool {
        self.variable_updates.is_empty() && self.edges.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Staging {
    variables: VariableStore,
    effects: StagedEffects,
}

impl Staging {
    fn update_variable_value(&mut self, variable_id: &str, value: String) {
        self.variables.update_variable_value(variable_id, value.clone());
        self.effects
            .variable_updates
            .push(VariableUpdate::new(variable_id, value));
    }

    fn create_edge(&mut self, from: EdgeSource, to: EdgeTarget) -> String {
        let id = generate_id();
        self.effects.edges.push(Edge {
            id: id.clone(),
            from,
            to,
        });
        id
    }
}

/// A typebot to inject into the conversation, and where to enter it.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedTypebot {
    pub typebot: Arc<Typebot>,
    /// Entry block; `None` enters at the typebot's start block.
    pub block_id: Option<String>,
}

/// Result of a logic step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogicOutcome {
    pub next_edge_id: Option<String>,
    pub linked_typebot: Option<LinkedTypebot>,
}

impl LogicOutcome {
    pub fn next(edge_id: Option<String>) -> Self {
        Self {
            next_edge_id: edge_id,
            linked_typebot: None,
        }
    }

    pub fn link(linked: LinkedTypebot) -> Self {
        Self {
            next_edge_id: None,
            linked_typebot: Some(linked),
        }
    }
}

/// Result of an integration step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationOutcome {
    pub next_edge_id: Option<String>,
}

/// Everything a logic executor may consult or change.
pub struct LogicContext {
    pub is_preview: bool,
    pub api_host: String,
    /// The typebot currently being traversed.
    pub typebot: Arc<Typebot>,
    /// Typebots already injected into this conversation.
    pub linked_typebots: Vec<Arc<Typebot>>,
    pub current_typebot_id: String,
    pub lookup: Arc<dyn TypebotLookup>,
    log: Arc<dyn LogSink>,
    staging: Staging,
}

impl LogicContext {
    pub fn new(
        typebot: Arc<Typebot>,
        variables: VariableStore,
        lookup: Arc<dyn TypebotLookup>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let current_typebot_id = typebot.id.clone();
        Self {
            is_preview: false,
            api_host: String::new(),
            typebot,
            linked_typebots: Vec::new(),
            current_typebot_id,
            lookup,
            log,
            staging: Staging {
                variables,
                effects: StagedEffects::default(),
            },
        }
    }

    pub fn with_preview(mut self, is_preview: bool) -> Self {
        self.is_preview = is_preview;
        self
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    pub fn with_linked_typebots(mut self, linked: Vec<Arc<Typebot>>) -> Self {
        self.linked_typebots = linked;
        self
    }

    /// Variables as seen by this call, including its own staged writes.
    pub fn variables(&self) -> &VariableStore {
        &self.staging.variables
    }

    pub fn update_variable_value(&mut self, variable_id: &str, value: impl Into<String>) {
        self.staging.update_variable_value(variable_id, value.into());
    }

    pub fn update_variables(&mut self, updates: impl IntoIterator<Item = VariableUpdate>) {
        for update in updates {
            self.staging
                .update_variable_value(&update.variable_id, update.value);
        }
    }

    pub fn on_new_log(&self, entry: LogEntry) {
        self.log.on_new_log(entry);
    }

    /// Find a typebot by id among the active one and the linked ones.
    pub fn known_typebot(&self, typebot_id: &str) -> Option<Arc<Typebot>> {
        std::iter::once(&self.typebot)
            .chain(self.linked_typebots.iter())
            .find(|t| t.id == typebot_id)
            .cloned()
    }

    pub fn into_effects(self) -> StagedEffects {
        self.staging.effects
    }
}

impl EdgeFactory for LogicContext {
    fn create_edge(&mut self, from: EdgeSource, to: EdgeTarget) -> String {
        self.staging.create_edge(from, to)
    }
}

/// Everything an integration executor may consult or change.
pub struct IntegrationContext {
    pub is_preview: bool,
    pub api_host: String,
    pub typebot_id: String,
    pub block_id: String,
    pub step_id: String,
    /// The typebot being traversed, for cross-references into its blocks.
    pub typebot: Arc<Typebot>,
    pub result_values: ResultValues,
    log: Arc<dyn LogSink>,
    staging: Staging,
}

impl IntegrationContext {
    pub fn new(
        typebot: Arc<Typebot>,
        block_id: impl Into<String>,
        step_id: impl Into<String>,
        variables: VariableStore,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let result_values = variables.current_values();
        Self {
            is_preview: false,
            api_host: String::new(),
            typebot_id: typebot.id.clone(),
            block_id: block_id.into(),
            step_id: step_id.into(),
            typebot,
            result_values,
            log,
            staging: Staging {
                variables,
                effects: StagedEffects::default(),
            },
        }
    }

    pub fn with_preview(mut self, is_preview: bool) -> Self {
        self.is_preview = is_preview;
        self
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    pub fn blocks(&self) -> &[Block] {
        &self.typebot.blocks
    }

    pub fn variables(&self) -> &VariableStore {
        &self.staging.variables
    }

    pub fn update_variable_value(&mut self, variable_id: &str, value: impl Into<String>) {
        self.staging.update_variable_value(variable_id, value.into());
    }

    pub fn update_variables(&mut self, updates: impl IntoIterator<Item = VariableUpdate>) {
        for update in updates {
            self.staging
                .update_variable_value(&update.variable_id, update.value);
        }
    }

    pub fn on_new_log(&self, entry: LogEntry) {
        self.log.on_new_log(entry);
    }

    pub fn into_effects(self) -> StagedEffects {
        self.staging.effects
    }
}
