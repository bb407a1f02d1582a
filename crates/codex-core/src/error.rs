use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodexError {
    // Planning errors
    #[error("Invalid node type for node '{node_id}': {raw:?}")]
    InvalidNodeType { node_id: String, raw: String },

    #[error("Invalid flow graph: {0}")]
    InvalidGraph(String),

    // Security errors
    #[error("Tool access denied: {tool}:{action}")]
    AccessDenied { tool: String, action: String },

    #[error("Resource quota exceeded for tool: {0}")]
    QuotaExceeded(String),

    #[error("Concurrent invocation limit reached for tool: {0}")]
    ConcurrencyLimit(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    Llm(String),

    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    // Execution errors
    #[error("Execution {execution_id} cancelled ({rollbacks_performed} rollbacks performed)")]
    Cancelled {
        execution_id: String,
        rollbacks_performed: usize,
    },

    #[error("Execution task failed: {0}")]
    TaskJoin(String),

    #[error("Rollback failed for step {step_id}: {message}")]
    Rollback { step_id: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodexError {
    /// Errors raised while compiling a flow, before any step has run.
    pub fn is_planning(&self) -> bool {
        matches!(self, Self::InvalidNodeType { .. } | Self::InvalidGraph(_))
    }

    /// Errors raised by the tool access or quota checks.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. } | Self::QuotaExceeded(_) | Self::ConcurrencyLimit(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodexError>;
