//! Conversation flow execution engine.
//!
//! A conversation walks a typebot's blocks one at a time. Each block instance
//! is driven by a [`BlockController`], which makes one step current at a time,
//! feeds visible steps into the chunk renderer, and reports completion with at
//! most one edge id and at most one linked typebot. The [`Conversation`]
//! resolves that edge into the next block, runs logic and integration steps
//! through the [`StepExecutor`], and manages the [`LinkStack`] when a logic
//! step injects another typebot.

pub mod block;
pub mod chunk;
pub mod conversation;
pub mod edges;
pub mod executor;
pub mod link_stack;
pub mod logic;
pub mod lookup;
pub mod sample_result;
pub mod webhook;

pub use block::{BlockController, BlockEnd, BlockEvent, Directive};
pub use chunk::Chunk;
pub use conversation::{Conversation, RenderedBlock, Services, Turn};
pub use edges::EdgeRegistry;
pub use executor::StepExecutor;
pub use link_stack::{LinkFrame, LinkStack};
pub use logic::DefaultLogicExecutor;
pub use lookup::{DirectoryTypebots, InMemoryTypebots};
pub use sample_result::sample_result;
pub use webhook::DefaultIntegrationExecutor;
