//! Per-entry structured log sink (spec §4.4).
//!
//! Keyed by `"<label>/<sample>_<scan>['<entry>']"`. Routes to a TCP logging
//! socket on localhost if `tasks/nxlogger.pid` exists, else appends to
//! `tasks/nxlogger.log`. In non-GUI mode, also echoes to stdout.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Matches Python's `logging.handlers.DEFAULT_TCP_LOGGING_PORT`.
pub const DEFAULT_TCP_LOGGING_PORT: u16 = 9020;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

trait Sink: Send {
    fn write_line(&self, line: &str) -> std::io::Result<()>;
}

struct FileSink(Mutex<std::fs::File>);

impl Sink for FileSink {
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut f = self.0.lock().unwrap();
        writeln!(f, "{line}")
    }
}

struct SocketSink(Mutex<TcpStream>);

impl Sink for SocketSink {
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut s = self.0.lock().unwrap();
        writeln!(s, "{line}")
    }
}

/// Logger keyed by `"<label>/<sample>_<scan>['<entry>']"` (spec §4.4).
pub struct Logger {
    key: String,
    sink: Box<dyn Sink>,
    echo_stdout: bool,
}

impl Logger {
    /// Build the logger's name the way the Python original formats it:
    /// `"<sample>_<scan>['<entry>']"`.
    pub fn format_key(sample: &str, scan: &str, entry: &str) -> String {
        format!("{sample}_{scan}['{entry}']")
    }

    /// Construct a logger for one entry, choosing socket vs. file by the
    /// presence of `tasks/nxlogger.pid`.
    pub fn for_entry(
        task_directory: impl AsRef<Path>,
        sample: &str,
        scan: &str,
        entry: &str,
        gui: bool,
    ) -> std::io::Result<Self> {
        let task_directory = task_directory.as_ref();
        let key = Self::format_key(sample, scan, entry);
        let pid_file = task_directory.join("nxlogger.pid");
        let sink: Box<dyn Sink> = if pid_file.exists() {
            let stream = TcpStream::connect(("127.0.0.1", DEFAULT_TCP_LOGGING_PORT))?;
            Box::new(SocketSink(Mutex::new(stream)))
        } else {
            let log_file = task_directory.join("nxlogger.log");
            let file = OpenOptions::new().create(true).append(true).open(log_file)?;
            Box::new(FileSink(Mutex::new(file)))
        };
        Ok(Self {
            key,
            sink,
            echo_stdout: !gui,
        })
    }

    /// A logger that only ever writes to a specific file (used by the
    /// `nxlogger` daemon itself and by tests).
    pub fn to_file(log_path: impl AsRef<Path>, key: &str, echo_stdout: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path.as_ref())?;
        Ok(Self {
            key: key.to_string(),
            sink: Box::new(FileSink(Mutex::new(file))),
            echo_stdout,
        })
    }

    fn emit(&self, level: Level, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = format!("{timestamp} {:<12}: [{}] {}", self.key, level.label(), message);
        let _ = self.sink.write_line(&line);
        if self.echo_stdout {
            println!("{line}");
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }
}

/// PID file path used to discover whether the socket-logging daemon is up.
pub fn logger_pid_path(task_directory: impl AsRef<Path>) -> PathBuf {
    task_directory.as_ref().join("nxlogger.pid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_key_matches_python_shape() {
        assert_eq!(Logger::format_key("ZnO", "157", "f1"), "ZnO_157['f1']");
    }

    #[test]
    fn file_sink_appends_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("nxlogger.log");
        let logger = Logger::to_file(&log_path, "ZnO_157['f1']", false).unwrap();
        logger.info("Data linked");
        logger.warn("No metadata files found");
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("Data linked"));
        assert!(contents.contains("[WARNING]"));
    }

    #[test]
    fn for_entry_falls_back_to_file_without_pid() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::for_entry(dir.path(), "ZnO", "157", "f1", true).unwrap();
        logger.info("hello");
        let contents = std::fs::read_to_string(dir.path().join("nxlogger.log")).unwrap();
        assert!(contents.contains("hello"));
    }
}
