/// Core error type for the bridge.
///
/// Adapter crates map their specific errors into this type so the core can
/// handle failures consistently (user-visible denial vs retryable external
/// failure).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not authorized")]
    Unauthorized,

    #[error("repository already tracked: {0}")]
    AlreadyTracked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("commit source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed commit source response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
