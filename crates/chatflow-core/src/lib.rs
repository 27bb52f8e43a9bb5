pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod traits;
pub mod typebot;
pub mod types;
pub mod validate;
pub mod variables;

pub use config::AppConfig;
pub use error::{FlowError, Result};
pub use log::{LogEntry, LogStatus};
pub use typebot::*;
pub use types::ConversationId;
pub use variables::VariableStore;
