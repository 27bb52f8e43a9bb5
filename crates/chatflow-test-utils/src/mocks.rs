use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use chatflow_core::context::{IntegrationContext, IntegrationOutcome, LogicContext, LogicOutcome};
use chatflow_core::error::{FlowError, Result};
use chatflow_core::log::LogEntry;
use chatflow_core::traits::{EdgeFactory, IntegrationExecutor, LogSink, LogicExecutor};
use chatflow_core::{Edge, EdgeSource, EdgeTarget, IntegrationStep, LogicStep, Step};

/// Edge factory that keeps what it creates.
#[derive(Debug, Default)]
pub struct RecordingEdges {
    pub created: Vec<Edge>,
}

impl EdgeFactory for RecordingEdges {
    fn create_edge(&mut self, from: EdgeSource, to: EdgeTarget) -> String {
        let id = format!("edge-{}", self.created.len());
        self.created.push(Edge {
            id: id.clone(),
            from,
            to,
        });
        id
    }
}

/// Log sink that keeps every entry.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogSink {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogSink for RecordingLogSink {
    fn on_new_log(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Debug, Clone)]
enum Behavior<O> {
    Resolve(O),
    Fail(String),
    Hang,
}

#[derive(Debug, Clone)]
struct Script<O> {
    behavior: Behavior<O>,
    writes: Vec<(String, String)>,
}

#[derive(Debug)]
struct Scripts<O> {
    by_step: HashMap<String, Script<O>>,
    calls: Mutex<Vec<String>>,
}

impl<O: Clone + Default> Scripts<O> {
    fn new() -> Self {
        Self {
            by_step: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn entry(&mut self, step_id: &str) -> &mut Script<O> {
        self.by_step
            .entry(step_id.to_string())
            .or_insert_with(|| Script {
                behavior: Behavior::Resolve(O::default()),
                writes: Vec::new(),
            })
    }

    fn record(&self, step_id: &str) -> Option<Script<O>> {
        self.calls.lock().unwrap().push(step_id.to_string());
        self.by_step.get(step_id).cloned()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

macro_rules! scripted_builders {
    ($outcome:ty) => {
        /// Resolve `step_id` with `outcome`.
        pub fn on(mut self, step_id: &str, outcome: $outcome) -> Self {
            self.scripts.entry(step_id).behavior = Behavior::Resolve(outcome);
            self
        }

        /// Stage a variable write when `step_id` runs.
        pub fn writes(mut self, step_id: &str, variable_id: &str, value: &str) -> Self {
            self.scripts
                .entry(step_id)
                .writes
                .push((variable_id.to_string(), value.to_string()));
            self
        }

        /// Reject `step_id` with an error.
        pub fn fail(mut self, step_id: &str, message: &str) -> Self {
            self.scripts.entry(step_id).behavior = Behavior::Fail(message.to_string());
            self
        }

        /// Stage the scripted writes for `step_id`, then never resolve.
        pub fn hang(mut self, step_id: &str) -> Self {
            self.scripts.entry(step_id).behavior = Behavior::Hang;
            self
        }

        /// Step ids executed so far, in order.
        pub fn calls(&self) -> Vec<String> {
            self.scripts.calls()
        }
    };
}

/// Logic executor driven by per-step scripts. Unscripted steps resolve with
/// no edge and no writes.
#[derive(Debug)]
pub struct ScriptedLogic {
    scripts: Scripts<LogicOutcome>,
}

impl Default for ScriptedLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLogic {
    pub fn new() -> Self {
        Self {
            scripts: Scripts::new(),
        }
    }

    scripted_builders!(LogicOutcome);
}

impl LogicExecutor for ScriptedLogic {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        _logic: &'a LogicStep,
        ctx: &'a mut LogicContext,
    ) -> BoxFuture<'a, Result<LogicOutcome>> {
        Box::pin(async move {
            let Some(script) = self.scripts.record(&step.id) else {
                return Ok(LogicOutcome::default());
            };
            for (variable_id, value) in &script.writes {
                ctx.update_variable_value(variable_id, value.clone());
            }
            match script.behavior {
                Behavior::Resolve(outcome) => Ok(outcome),
                Behavior::Fail(message) => Err(FlowError::Logic(message)),
                Behavior::Hang => futures::future::pending().await,
            }
        })
    }
}

/// Integration executor driven by per-step scripts.
#[derive(Debug)]
pub struct ScriptedIntegration {
    scripts: Scripts<IntegrationOutcome>,
}

impl Default for ScriptedIntegration {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedIntegration {
    pub fn new() -> Self {
        Self {
            scripts: Scripts::new(),
        }
    }

    scripted_builders!(IntegrationOutcome);
}

impl IntegrationExecutor for ScriptedIntegration {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        _integration: &'a IntegrationStep,
        ctx: &'a mut IntegrationContext,
    ) -> BoxFuture<'a, Result<IntegrationOutcome>> {
        Box::pin(async move {
            let Some(script) = self.scripts.record(&step.id) else {
                return Ok(IntegrationOutcome::default());
            };
            for (variable_id, value) in &script.writes {
                ctx.update_variable_value(variable_id, value.clone());
            }
            match script.behavior {
                Behavior::Resolve(outcome) => Ok(outcome),
                Behavior::Fail(message) => Err(FlowError::Integration(message)),
                Behavior::Hang => futures::future::pending().await,
            }
        })
    }
}
