use futures::future::BoxFuture;

use crate::context::{IntegrationContext, IntegrationOutcome, LogicContext, LogicOutcome};
use crate::error::Result;
use crate::log::LogEntry;
use crate::typebot::{EdgeSource, EdgeTarget, IntegrationStep, LogicStep, Step, Typebot};

/// Resolves typebot ids to graphs.
///
/// `Ok(None)` means not found; callers above the engine decide how to surface it.
pub trait TypebotLookup: Send + Sync + 'static {
    fn get_typebot<'a>(&'a self, typebot_id: &'a str) -> BoxFuture<'a, Result<Option<Typebot>>>;
}

/// Fire-and-forget execution trace.
///
/// Implementations must return promptly and never fail.
pub trait LogSink: Send + Sync + 'static {
    fn on_new_log(&self, entry: LogEntry);
}

/// Creates edges at runtime, for retry synthesis and dynamically generated branches.
pub trait EdgeFactory {
    /// Register a new edge and return its id.
    fn create_edge(&mut self, from: EdgeSource, to: EdgeTarget) -> String;
}

/// Runs logic steps: local computations (variables, conditions, links).
pub trait LogicExecutor: Send + Sync + 'static {
    /// Run a logic step. Variable writes and created edges go through `ctx`
    /// and only take effect once the returned future resolves.
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        logic: &'a LogicStep,
        ctx: &'a mut LogicContext,
    ) -> BoxFuture<'a, Result<LogicOutcome>>;
}

/// Runs integration steps, which call out to external systems.
pub trait IntegrationExecutor: Send + Sync + 'static {
    /// Run an integration step. In preview mode implementations must simulate
    /// rather than perform the external effect.
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        integration: &'a IntegrationStep,
        ctx: &'a mut IntegrationContext,
    ) -> BoxFuture<'a, Result<IntegrationOutcome>>;
}
