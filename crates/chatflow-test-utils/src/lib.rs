//! Fixtures and mock collaborators for chatflow tests.

pub mod fixtures;
pub mod mocks;

pub use mocks::{RecordingEdges, RecordingLogSink, ScriptedIntegration, ScriptedLogic};
