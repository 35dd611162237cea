//! Durable catalogue of wrapper files, their entries, and per-(task, entry)
//! status (spec §3, §4.2).

use crate::error::{Result, ServerError};
use crate::status::{Status, TASK_NAMES};
use chrono::Utc;
use nxrefine_store::WrapperFile;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    last_modified TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES file(id),
    name TEXT NOT NULL,
    UNIQUE(file_id, name)
);

CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES file(id),
    entry TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    queue_time TEXT,
    start_time TEXT,
    end_time TEXT,
    UNIQUE(file_id, entry, name)
);
"#;

/// A row from `file` plus its known entries and tasks, for reporting.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub entry: String,
    pub name: String,
    pub status: Status,
    pub queue_time: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// SQLite-backed task catalogue. Single-writer: all mutation goes through
/// one `Mutex<Connection>`, matching spec §4.2's "single-writer
/// transactions" requirement without needing an external database server.
pub struct TaskDatabase {
    conn: Mutex<Connection>,
}

impl TaskDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register (or touch) a wrapper file, returning its database id.
    pub fn register_file(&self, path: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO file (path, last_modified) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET last_modified = excluded.last_modified",
            params![path, now],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM file WHERE path = ?1",
            params![path],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, path, last_modified FROM file WHERE path = ?1",
            params![path],
            |r| {
                Ok(FileRecord {
                    id: r.get(0)?,
                    path: r.get(1)?,
                    last_modified: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(ServerError::from)
    }

    /// Ensure `entry` is catalogued under `file_id` (idempotent).
    pub fn register_entry(&self, file_id: i64, entry: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO entry (file_id, name) VALUES (?1, ?2)",
            params![file_id, entry],
        )?;
        Ok(())
    }

    pub fn entries(&self, file_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM entry WHERE file_id = ?1")?;
        let rows = stmt
            .query_map(params![file_id], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_task(
        &self,
        file_id: i64,
        entry: &str,
        task: &str,
        status: Status,
        touch: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO task (file_id, entry, name, status, queue_time, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4,
                     CASE WHEN ?5 = 'queue' THEN ?6 ELSE NULL END,
                     CASE WHEN ?5 = 'start' THEN ?6 ELSE NULL END,
                     CASE WHEN ?5 = 'end' THEN ?6 ELSE NULL END)
             ON CONFLICT(file_id, entry, name) DO UPDATE SET
                status = excluded.status,
                queue_time = CASE WHEN ?5 = 'queue' THEN ?6 ELSE task.queue_time END,
                start_time = CASE WHEN ?5 = 'start' THEN ?6 ELSE task.start_time END,
                end_time = CASE WHEN ?5 = 'end' THEN ?6 ELSE task.end_time END",
            params![file_id, entry, task, status.as_str(), touch, now],
        )?;
        Ok(())
    }

    pub fn queue_task(&self, file_id: i64, entry: &str, task: &str) -> Result<()> {
        self.upsert_task(file_id, entry, task, Status::Queued, "queue")
    }

    pub fn start_task(&self, file_id: i64, entry: &str, task: &str) -> Result<()> {
        self.upsert_task(file_id, entry, task, Status::InProgress, "start")
    }

    pub fn end_task(&self, file_id: i64, entry: &str, task: &str) -> Result<()> {
        self.upsert_task(file_id, entry, task, Status::Done, "end")
    }

    pub fn fail_task(&self, file_id: i64, entry: &str, task: &str) -> Result<()> {
        self.upsert_task(file_id, entry, task, Status::Failed, "end")
    }

    /// Reset a DONE/FAILED task back to QUEUED for an `overwrite` re-run.
    pub fn requeue_task(&self, file_id: i64, entry: &str, task: &str) -> Result<()> {
        self.upsert_task(file_id, entry, task, Status::Queued, "queue")
    }

    pub fn get_task(&self, file_id: i64, entry: &str, task: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT entry, name, status, queue_time, start_time, end_time
             FROM task WHERE file_id = ?1 AND entry = ?2 AND name = ?3",
            params![file_id, entry, task],
            |r| {
                let status_str: String = r.get(2)?;
                Ok(TaskRecord {
                    entry: r.get(0)?,
                    name: r.get(1)?,
                    status: Status::parse(&status_str).unwrap_or(Status::Queued),
                    queue_time: r.get(3)?,
                    start_time: r.get(4)?,
                    end_time: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(ServerError::from)
    }

    pub fn tasks_for_file(&self, file_id: i64) -> Result<Vec<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry, name, status, queue_time, start_time, end_time
             FROM task WHERE file_id = ?1 ORDER BY entry, name",
        )?;
        let rows = stmt
            .query_map(params![file_id], |r| {
                let status_str: String = r.get(2)?;
                Ok(TaskRecord {
                    entry: r.get(0)?,
                    name: r.get(1)?,
                    status: Status::parse(&status_str).unwrap_or(Status::Queued),
                    queue_time: r.get(3)?,
                    start_time: r.get(4)?,
                    end_time: r.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Commit barrier; exposed so callers (and tests) have an explicit point
    /// at which "the database status equals the file status" (invariant
    /// (iii) of spec §3) is guaranteed to hold.
    pub fn sync(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);").ok();
        Ok(())
    }

    /// Rescan `wrapper`'s process records and reconcile every known task's
    /// status against them, refreshing `last_modified` from the file's
    /// mtime (spec §4.2, invariant (iii)). A process record present in the
    /// wrapper means the task is DONE; its absence demotes a stale
    /// DONE/IN_PROGRESS row back to QUEUED rather than leaving the database
    /// out of step with the file.
    pub fn update_file(&self, file_id: i64, path: &str, wrapper: &WrapperFile) -> Result<()> {
        let last_modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|_| Utc::now().to_rfc3339());
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE file SET last_modified = ?1 WHERE id = ?2",
                params![last_modified, file_id],
            )?;
        }

        let sub_entries = wrapper.entries();
        for entry in &sub_entries {
            self.register_entry(file_id, entry)?;
        }

        // "entry" carries the aggregate (multi-entry) process records;
        // reconcile it alongside the real sub-entries without registering
        // it as one, since it is not a detector entry itself.
        let mut reconcile_entries = sub_entries;
        reconcile_entries.push("entry".to_string());

        for entry in &reconcile_entries {
            for &task in TASK_NAMES {
                let done = wrapper.has_process(entry, task);
                let existing = self.get_task(file_id, entry, task)?;
                match (done, existing) {
                    (true, Some(rec)) if rec.status == Status::Done => {}
                    (true, _) => self.end_task(file_id, entry, task)?,
                    (false, Some(rec)) if rec.status == Status::Done => {
                        self.requeue_task(file_id, entry, task)?;
                    }
                    (false, _) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_file_is_idempotent() {
        let db = TaskDatabase::open_in_memory().unwrap();
        let id1 = db.register_file("/data/s/l/s_1.nxs").unwrap();
        let id2 = db.register_file("/data/s/l/s_1.nxs").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn task_lifecycle_transitions() {
        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file("/data/s/l/s_1.nxs").unwrap();

        db.queue_task(file_id, "f1", "nxfind").unwrap();
        let t = db.get_task(file_id, "f1", "nxfind").unwrap().unwrap();
        assert_eq!(t.status, Status::Queued);
        assert!(t.queue_time.is_some());

        db.start_task(file_id, "f1", "nxfind").unwrap();
        let t = db.get_task(file_id, "f1", "nxfind").unwrap().unwrap();
        assert_eq!(t.status, Status::InProgress);
        assert!(t.start_time.is_some());
        assert!(t.queue_time.is_some());

        db.end_task(file_id, "f1", "nxfind").unwrap();
        let t = db.get_task(file_id, "f1", "nxfind").unwrap().unwrap();
        assert_eq!(t.status, Status::Done);
        assert!(t.end_time.is_some());

        db.requeue_task(file_id, "f1", "nxfind").unwrap();
        let t = db.get_task(file_id, "f1", "nxfind").unwrap().unwrap();
        assert_eq!(t.status, Status::Queued);
    }

    #[test]
    fn fail_task_sets_failed() {
        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file("/data/s/l/s_1.nxs").unwrap();
        db.queue_task(file_id, "f1", "nxrefine").unwrap();
        db.start_task(file_id, "f1", "nxrefine").unwrap();
        db.fail_task(file_id, "f1", "nxrefine").unwrap();
        let t = db.get_task(file_id, "f1", "nxrefine").unwrap().unwrap();
        assert_eq!(t.status, Status::Failed);
    }

    #[test]
    fn entries_are_scoped_per_file() {
        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file("/data/s/l/s_1.nxs").unwrap();
        db.register_entry(file_id, "f1").unwrap();
        db.register_entry(file_id, "f2").unwrap();
        db.register_entry(file_id, "f1").unwrap(); // idempotent
        let mut entries = db.entries(file_id).unwrap();
        entries.sort();
        assert_eq!(entries, vec!["f1".to_string(), "f2".to_string()]);
    }

    fn fake_process_record(program: &str) -> nxrefine_store::ProcessRecord {
        nxrefine_store::ProcessRecord {
            program: program.to_string(),
            sequence_index: 1,
            version: "0.1.0".to_string(),
            machine: "test-host".to_string(),
            directory: "/data/s/l".to_string(),
            parameters: Default::default(),
        }
    }

    #[test]
    fn update_file_marks_done_from_process_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s_1.nxs");
        std::fs::write(&path, b"x").unwrap();
        let path_str = path.to_str().unwrap();

        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file(path_str).unwrap();

        let mut wrapper = WrapperFile::new(&path);
        wrapper.record("f1", fake_process_record("nxfind"));

        db.update_file(file_id, path_str, &wrapper).unwrap();

        let t = db.get_task(file_id, "f1", "nxfind").unwrap().unwrap();
        assert_eq!(t.status, Status::Done);
        let untouched = db.get_task(file_id, "f1", "nxmax").unwrap();
        assert!(untouched.is_none());
        assert!(db.entries(file_id).unwrap().contains(&"f1".to_string()));
    }

    #[test]
    fn update_file_requeues_stale_done_rows_once_process_record_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s_1.nxs");
        std::fs::write(&path, b"x").unwrap();
        let path_str = path.to_str().unwrap();

        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file(path_str).unwrap();

        let mut wrapper = WrapperFile::new(&path);
        wrapper.record("f1", fake_process_record("nxfind"));
        db.update_file(file_id, path_str, &wrapper).unwrap();
        assert_eq!(
            db.get_task(file_id, "f1", "nxfind").unwrap().unwrap().status,
            Status::Done
        );

        wrapper.clear_process("f1", "nxfind");
        db.update_file(file_id, path_str, &wrapper).unwrap();
        assert_eq!(
            db.get_task(file_id, "f1", "nxfind").unwrap().unwrap().status,
            Status::Queued
        );
    }

    #[test]
    fn update_file_reconciles_aggregate_tasks_under_top_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s_1.nxs");
        std::fs::write(&path, b"x").unwrap();
        let path_str = path.to_str().unwrap();

        let db = TaskDatabase::open_in_memory().unwrap();
        let file_id = db.register_file(path_str).unwrap();

        let mut wrapper = WrapperFile::new(&path);
        wrapper.record("entry", fake_process_record("nxcombine"));
        db.update_file(file_id, path_str, &wrapper).unwrap();

        let t = db.get_task(file_id, "entry", "nxcombine").unwrap().unwrap();
        assert_eq!(t.status, Status::Done);
    }
}
