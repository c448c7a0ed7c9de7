use thiserror::Error;

/// Unified error type for the entire simulation.
#[derive(Error, Debug)]
pub enum SimError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {agent}: {reason}")]
    Agent { agent: String, reason: String },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm error: {0}")]
    Llm(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("llm request timed out after {0}s")]
    Timeout(u64),

    #[error("malformed llm response: {0}")]
    MalformedResponse(String),

    // ── Embedding errors ───────────────────────────────────────
    #[error("embedding error: {0}")]
    Embedding(String),

    // ── Memory errors ──────────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    // ── Conversation errors ────────────────────────────────────
    #[error("conversation error: {0}")]
    Conversation(String),

    // ── World errors ───────────────────────────────────────────
    #[error("world error: {0}")]
    World(String),

    // ── Scheduler errors ───────────────────────────────────────
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("tick {tick} panicked: {reason}")]
    TickPanicked { tick: u64, reason: String },

    #[error("deferred mutation failed: {0}")]
    MutationFailed(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Shorthand for an [`SimError::Agent`] error.
    pub fn agent(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::Agent {
            agent: agent.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
