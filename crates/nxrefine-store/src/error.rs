use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the wrapper-file store and the advisory file lock.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock on '{0}' timed out")]
    LockTimeout(PathBuf),

    #[error("no such node '{0}' in wrapper tree")]
    NotFound(String),

    #[error("node '{0}' is not a group")]
    NotAGroup(String),

    #[error("node '{0}' is not a field")]
    NotAField(String),

    #[error("malformed wrapper file '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
