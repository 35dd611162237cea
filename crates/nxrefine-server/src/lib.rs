//! Task database, task queue/server, and per-entry logger.
//!
//! This crate is the coordination layer: it knows nothing about detector
//! geometry or reflection data, only about which tasks exist, what state
//! they are in, and where to send log lines for a running reduction.

pub mod db;
pub mod error;
pub mod logger;
pub mod server;
pub mod status;

pub use db::{FileRecord, TaskDatabase, TaskRecord};
pub use error::{Result, ServerError};
pub use logger::{logger_pid_path, Level, Logger, DEFAULT_TCP_LOGGING_PORT};
pub use server::{Cluster, Dispatch, Multicore, TaskServer, WorkerPool};
pub use status::{Status, TASK_NAMES};
