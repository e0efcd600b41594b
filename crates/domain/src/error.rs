/// Shared error type used across all Maestro crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("transport failure calling provider {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("tool error from provider {provider}: {message}")]
    Tool { provider: String, message: String },

    #[error("reasoning model: {0}")]
    Reasoning(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable label for this error.
    ///
    /// Recorded as `error_kind` on lineage entries so failures stay
    /// grep-able after serialization.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::UnknownTool(_) => "unknown_tool",
            Error::InvalidArguments { .. } => "invalid_arguments",
            Error::Transport { .. } => "transport_error",
            Error::Tool { .. } => "tool_error",
            Error::Reasoning(_) => "reasoning_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
