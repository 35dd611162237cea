//! Advisory per-path file lock with timeout, retry, and scoped acquisition.
//!
//! A lock on absolute path `P` is represented by a sidecar file `P.lock`
//! containing the owning PID. Locks are advisory: they only block other
//! processes that go through [`FileLock`] themselves.

use crate::error::{Result, StoreError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default timeout for lock acquisition, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default poll interval while waiting on a held lock, in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 1;

/// An advisory lock on a single path, backed by a `<path>.lock` sidecar file.
pub struct FileLock {
    path: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
    check_interval: Duration,
}

impl FileLock {
    /// Create a lock description for `path` (does not acquire).
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = canonical_or_as_is(path.as_ref());
        let lock_path = sidecar_path(&path);
        Self {
            path,
            lock_path,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to create the sidecar file exclusively, writing the current PID.
    fn try_acquire_once(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(mut f) => {
                write!(f, "{}", std::process::id()).map_err(|e| StoreError::Io {
                    path: self.lock_path.clone(),
                    source: e,
                })?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::Io {
                path: self.lock_path.clone(),
                source: e,
            }),
        }
    }

    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// Returns a [`LockGuard`] that releases the sidecar file on drop.
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        if self.try_acquire_once()? {
            return Ok(LockGuard { lock: self });
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            std::thread::sleep(self.check_interval);
            if self.try_acquire_once()? {
                return Ok(LockGuard { lock: self });
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(self.path.clone()));
            }
        }
    }

    /// Release the lock unconditionally (idempotent).
    fn release(&self) {
        let _ = fs::remove_file(&self.lock_path);
    }

    /// Acquire the lock, run `f`, and release it even if `f` panics or errors.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.acquire()?;
        f()
    }
}

/// RAII guard released on drop (normal return or unwind).
pub struct LockGuard<'a> {
    lock: &'a FileLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}

fn canonical_or_as_is(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn acquire_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wrapper.nxs");
        std::fs::write(&target, b"x").unwrap();

        let lock = FileLock::new(&target);
        {
            let _g = lock.acquire().unwrap();
            assert!(lock.lock_path.exists());
        }
        assert!(!lock.lock_path.exists());
    }

    #[test]
    fn second_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wrapper.nxs");
        std::fs::write(&target, b"x").unwrap();

        let lock1 = FileLock::new(&target)
            .with_timeout(Duration::from_millis(50))
            .with_check_interval(Duration::from_millis(10));
        let _g1 = lock1.acquire().unwrap();

        let lock2 = FileLock::new(&target)
            .with_timeout(Duration::from_millis(50))
            .with_check_interval(Duration::from_millis(10));
        let result = lock2.acquire();
        assert!(matches!(result, Err(StoreError::LockTimeout(_))));
    }

    #[test]
    fn with_lock_releases_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wrapper.nxs");
        std::fs::write(&target, b"x").unwrap();

        let lock = FileLock::new(&target);
        let result: Result<()> = lock.with_lock(|| Err(StoreError::NotFound("x".into())));
        assert!(result.is_err());
        assert!(!lock.lock_path.exists());
    }

    #[test]
    fn concurrent_waiters_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wrapper.nxs");
        std::fs::write(&target, b"x").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let target = target.clone();
                let counter = Arc::clone(&counter);
                let max_concurrent = Arc::clone(&max_concurrent);
                scope.spawn(move || {
                    let lock = FileLock::new(&target)
                        .with_timeout(Duration::from_secs(5))
                        .with_check_interval(Duration::from_millis(5));
                    let _g = lock.acquire().unwrap();
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
