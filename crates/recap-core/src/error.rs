//! Error types for the conversation engine

use recap_voice::VoiceError;
use thiserror::Error;

/// Result type alias for engine operations
pub type RecapResult<T> = Result<T, RecapError>;

#[derive(Error, Debug)]
pub enum RecapError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A file the process cannot start without.
    #[error("required resource missing: {path}: {source}")]
    Resource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chat backend error: {0}")]
    Chat(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("session is closed")]
    SessionClosed,

    #[error("startup warm-up failed: {0}")]
    Warmup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
