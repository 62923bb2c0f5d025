/// Shared error type used across all Mnemon crates.
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

    #[error("SQL: {0}")]
    Sql(String),

    #[error("KV: {0}")]
    Kv(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limit: {0}")]
    RateLimited(String),

    #[error("context length: {0}")]
    ContextLength(String),

    #[error("upstream {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("logic: {0}")]
    Logic(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error stems from an unavailable substrate or transport
    /// rather than a bug in our own reasoning. Drives the log category used
    /// by the event bus and the gateway.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::Sql(_)
                | Error::Kv(_)
                | Error::Upstream { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
