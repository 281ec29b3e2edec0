/// Shared error type used across every crate in this workspace.
///
/// Variants line up with the error taxonomy: configuration failures are
/// fatal at startup, everything else is something a worker loop catches,
/// logs, and recovers from (or surfaces to the chat as a failed turn).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("lease lost: {0}")]
    LeaseLost(String),

    #[error("adapter {provider} failed to start: {message}")]
    AdapterSpawn { provider: String, message: String },

    #[error("adapter {provider} stream error: {message}")]
    AdapterStream { provider: String, message: String },

    #[error("chat delivery failed: {0}")]
    Delivery(String),

    #[error("chat API: {0}")]
    ChatApi(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: f64 },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
