use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not resolve media info: {0}")]
    Resolve(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out after {seconds}s: {tool}")]
    ExternalToolTimedOut { tool: String, seconds: u64 },

    #[error("no item at position {index} in a batch of {total}")]
    StaleSelection { index: u32, total: usize },

    #[error("destination is not usable: {path}: {message}")]
    Destination { path: PathBuf, message: String },

    #[error("run canceled")]
    Canceled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
