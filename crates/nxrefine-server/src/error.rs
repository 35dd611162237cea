use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such file registered: {0}")]
    UnknownFile(String),

    #[error("no such task: file={file} entry={entry} task={task}")]
    UnknownTask {
        file: String,
        entry: String,
        task: String,
    },

    #[error("server already running (pid file present at {0})")]
    AlreadyRunning(std::path::PathBuf),

    #[error("no running server (pid file absent at {0})")]
    NotRunning(std::path::PathBuf),
}

pub type Result<T> = std::result::Result<T, ServerError>;
