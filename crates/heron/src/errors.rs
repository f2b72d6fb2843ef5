use thiserror::Error;

/// Failures raised by the model call gateway.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model credential expired or was rejected: {0}")]
    AuthExpired(String),

    #[error("model endpoint rate limited the request: {0}")]
    RateLimited(String),

    #[error("model endpoint returned an uninterpretable response: {0}")]
    Malformed(String),

    #[error("model endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Failures raised by a tool invocation. These are recoverable by design:
/// the agent loop renders them into conversation content so the model can
/// correct itself, and never aborts the session over one.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments for tool `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("ambiguous outcome for tool `{tool}`: {message}")]
    Ambiguous { tool: String, message: String },

    #[error("tool server unreachable: {0}")]
    Unreachable(String),
}

/// Failure to discover the tool catalog. Fatal for the session: without a
/// catalog there is no degraded tool-less mode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("tool catalog unavailable: {0}")]
    Unavailable(String),
}

/// Terminal outcome of an agent run that did not produce an answer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("turn limit of {0} exceeded without a final answer")]
    TurnLimitExceeded(usize),

    #[error("session cancelled before completion")]
    Cancelled,

    #[error("model gateway failed: {0}")]
    Model(#[from] ModelError),

    #[error("tool catalog failed: {0}")]
    Catalog(#[from] CatalogError),
}
