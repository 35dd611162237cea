//! A persistent FIFO of task descriptors, consumed by a pool of workers
//! (spec §4.3). Discovered via a PID file in `tasks/`.

use crate::error::{Result, ServerError};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// A persisted FIFO of shell-equivalent task descriptors.
///
/// Crash of a worker does not lose queued tasks: every mutation rewrites
/// the backing file, so a freshly-started server rebuilds its in-memory
/// queue from disk.
pub struct TaskServer {
    fifo_path: PathBuf,
    pid_path: PathBuf,
    queue: Mutex<VecDeque<String>>,
}

impl TaskServer {
    pub fn open(task_directory: impl AsRef<Path>) -> Result<Self> {
        let task_directory = task_directory.as_ref();
        fs::create_dir_all(task_directory)?;
        let fifo_path = task_directory.join("nxserver.fifo");
        let pid_path = task_directory.join("nxserver.pid");
        let queue = if fifo_path.exists() {
            let contents = fs::read_to_string(&fifo_path)?;
            contents.lines().map(str::to_string).collect()
        } else {
            VecDeque::new()
        };
        Ok(Self {
            fifo_path,
            pid_path,
            queue: Mutex::new(queue),
        })
    }

    fn persist(&self, queue: &VecDeque<String>) -> Result<()> {
        let mut f = fs::File::create(&self.fifo_path)?;
        for cmd in queue {
            writeln!(f, "{cmd}")?;
        }
        Ok(())
    }

    /// Append a command to the end of the queue.
    pub fn add_task(&self, cmd: impl Into<String>) -> Result<()> {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(cmd.into());
        self.persist(&queue)
    }

    /// Pop the next command in FIFO order, if any.
    pub fn pop_task(&self) -> Result<Option<String>> {
        let mut queue = self.queue.lock().unwrap();
        let cmd = queue.pop_front();
        self.persist(&queue)?;
        Ok(cmd)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write this process's PID to `tasks/nxserver.pid`, failing if a
    /// server is already discoverable there.
    pub fn claim_pid(&self) -> Result<()> {
        if self.pid_path.exists() {
            return Err(ServerError::AlreadyRunning(self.pid_path.clone()));
        }
        fs::write(&self.pid_path, std::process::id().to_string())?;
        Ok(())
    }

    pub fn release_pid(&self) -> Result<()> {
        if self.pid_path.exists() {
            fs::remove_file(&self.pid_path)?;
        }
        Ok(())
    }

    pub fn is_running(task_directory: impl AsRef<Path>) -> bool {
        task_directory.as_ref().join("nxserver.pid").exists()
    }
}

/// One execution slot: a local CPU core or a named cluster host.
pub trait Dispatch: Send + Sync {
    /// Run `cmd` to completion, returning its exit status.
    fn run(&self, cmd: &str) -> Result<std::process::ExitStatus>;

    /// Number of commands this dispatcher can run concurrently.
    fn capacity(&self) -> usize;
}

fn run_shell(cmd: &str) -> Result<std::process::ExitStatus> {
    let status = Command::new("sh").arg("-c").arg(cmd).status()?;
    Ok(status)
}

/// Multicore deployment: N worker slots on one host, backed by the
/// process's own CPU count.
pub struct Multicore {
    n_workers: usize,
}

impl Multicore {
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers: n_workers.max(1),
        }
    }

    pub fn detected() -> Self {
        Self::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

impl Dispatch for Multicore {
    fn run(&self, cmd: &str) -> Result<std::process::ExitStatus> {
        run_shell(cmd)
    }

    fn capacity(&self) -> usize {
        self.n_workers
    }
}

/// Cluster deployment: tasks dispatched to a static list of named hosts,
/// one slot per host, over an external remote-execution transport (e.g.
/// SSH — that transport itself is out of scope; here we only model "one
/// slot busy per host").
pub struct Cluster {
    hosts: Vec<String>,
    remote_shell: String,
}

impl Cluster {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            remote_shell: "ssh".to_string(),
        }
    }

    pub fn with_remote_shell(mut self, shell: impl Into<String>) -> Self {
        self.remote_shell = shell.into();
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn run_on_host(&self, host: &str, cmd: &str) -> Result<std::process::ExitStatus> {
        let status = Command::new(&self.remote_shell).arg(host).arg(cmd).status()?;
        Ok(status)
    }
}

impl Dispatch for Cluster {
    fn run(&self, cmd: &str) -> Result<std::process::ExitStatus> {
        let host = self.hosts.first().ok_or_else(|| {
            ServerError::UnknownFile("no cluster hosts configured".to_string())
        })?;
        self.run_on_host(host, cmd)
    }

    fn capacity(&self) -> usize {
        self.hosts.len().max(1)
    }
}

/// Drains a [`TaskServer`]'s queue through a [`Dispatch`] backend, running
/// up to `capacity()` commands concurrently via a rayon thread pool sized
/// to match.
pub struct WorkerPool<D: Dispatch> {
    server: std::sync::Arc<TaskServer>,
    dispatch: D,
}

impl<D: Dispatch> WorkerPool<D> {
    pub fn new(server: std::sync::Arc<TaskServer>, dispatch: D) -> Self {
        Self { server, dispatch }
    }

    /// Run every currently-queued command to completion, honoring the
    /// backend's concurrency `capacity()`. Returns the list of
    /// `(command, exit_status)` pairs in the order each command finished.
    pub fn drain(&self) -> Result<Vec<(String, std::process::ExitStatus)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.dispatch.capacity())
            .build()
            .map_err(|e| ServerError::UnknownFile(e.to_string()))?;

        let results = std::sync::Mutex::new(Vec::new());
        pool.scope(|scope| loop {
            let cmd = match self.server.pop_task() {
                Ok(Some(cmd)) => cmd,
                Ok(None) => break,
                Err(_) => break,
            };
            let dispatch = &self.dispatch;
            let results = &results;
            scope.spawn(move |_| {
                if let Ok(status) = dispatch.run(&cmd) {
                    results.lock().unwrap().push((cmd, status));
                }
            });
        });

        Ok(results.into_inner().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let server = TaskServer::open(dir.path()).unwrap();
        server.add_task("nxreduce -d a -e f1").unwrap();
        server.add_task("nxreduce -d a -e f2").unwrap();
        assert_eq!(server.len(), 2);
        assert_eq!(
            server.pop_task().unwrap(),
            Some("nxreduce -d a -e f1".to_string())
        );
        assert_eq!(
            server.pop_task().unwrap(),
            Some("nxreduce -d a -e f2".to_string())
        );
        assert_eq!(server.pop_task().unwrap(), None);
    }

    #[test]
    fn fifo_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let server = TaskServer::open(dir.path()).unwrap();
            server.add_task("nxreduce -d a -e f1").unwrap();
        }
        let reopened = TaskServer::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn pid_claim_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let server = TaskServer::open(dir.path()).unwrap();
        server.claim_pid().unwrap();
        assert!(TaskServer::is_running(dir.path()));
        let result = server.claim_pid();
        assert!(result.is_err());
        server.release_pid().unwrap();
        assert!(!TaskServer::is_running(dir.path()));
    }

    #[test]
    fn multicore_runs_true_commands() {
        let dir = tempfile::tempdir().unwrap();
        let server = std::sync::Arc::new(TaskServer::open(dir.path()).unwrap());
        server.add_task("true").unwrap();
        server.add_task("true").unwrap();
        let pool = WorkerPool::new(server, Multicore::new(2));
        let results = pool.drain().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, status)| status.success()));
    }

    #[test]
    fn cluster_capacity_matches_host_count() {
        let cluster = Cluster::new(vec!["node1".into(), "node2".into(), "node3".into()]);
        assert_eq!(cluster.capacity(), 3);
    }
}
