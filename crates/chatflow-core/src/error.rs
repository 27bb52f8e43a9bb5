use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph lookup errors
    #[error("Typebot not found: {0}")]
    TypebotNotFound(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Typebot {0} has no start block")]
    NoStartBlock(String),

    // Traversal errors
    #[error("Unexpected event: expected {expected}, got {got}")]
    UnexpectedEvent { expected: String, got: String },

    #[error("Block already finished")]
    BlockFinished,

    #[error("Conversation exceeded {0} consecutive block transitions without user interaction")]
    LoopDetected(usize),

    #[error("Conversation cancelled")]
    Cancelled,

    // Executor errors
    #[error("Logic execution failed: {0}")]
    Logic(String),

    #[error("Integration execution failed: {0}")]
    Integration(String),

    #[error("Webhook failed: {0}")]
    Webhook(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid typebot: {0}")]
    Validation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
