//! Error types for Lode.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LodeError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Ambiguous session ID prefix: {0}")]
    AmbiguousSessionId(String),

    #[error("Gem not found: {0}")]
    GemNotFound(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
