use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("raw data not found at {0}")]
    NotFound(PathBuf),

    #[error("timed out acquiring lock on {0}")]
    LockTimeout(PathBuf),

    #[error("prerequisite stage not complete: {stage} requires {prereq} on entry {entry}")]
    PrereqIncomplete {
        stage: &'static str,
        prereq: &'static str,
        entry: String,
    },

    #[error("subprocess {program} exited with status {code:?}: {stderr}")]
    SubprocessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid or missing HKL grid: {0}")]
    InvalidGrid(String),

    #[error("refinement did not converge: {0}")]
    RefinementFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] nxrefine_store::StoreError),

    #[error("server error: {0}")]
    Server(#[from] nxrefine_server::ServerError),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReduceError>;
