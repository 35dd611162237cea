//! The wrapper record: one top `entry` plus one sub-entry per detector
//! position, backed by the opaque hierarchical container (spec §3).
//!
//! The real container format is external; this module persists the tree of
//! §`tree` via `serde_json` so the rest of the workspace has something
//! concrete to read and write while developing against the same shape the
//! production format would expose (groups, fields, links, attributes).

use crate::error::{Result, StoreError};
use crate::tree::{Field, Group, Node, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A `NXprocess`-equivalent record: proof that a stage ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub program: String,
    pub sequence_index: u32,
    pub version: String,
    pub machine: String,
    pub directory: String,
    /// Free-form key/value parameters, rendered the way the Python
    /// original renders them: `key.replace('_', ' ').capitalize(): value`.
    pub parameters: BTreeMap<String, String>,
}

impl ProcessRecord {
    pub fn to_group(&self) -> Group {
        let mut g = Group::new();
        g.insert_field("program", Field::new(self.program.clone()));
        g.insert_field(
            "sequence_index",
            Field::new(self.sequence_index as i64),
        );
        g.insert_field("version", Field::new(self.version.clone()));
        let note_text = format!(
            "Current machine: {}\nCurrent directory: {}\n{}",
            self.machine,
            self.directory,
            self.parameters
                .iter()
                .map(|(k, v)| format!("{}: {}", capitalize_key(k), v))
                .collect::<Vec<_>>()
                .join("\n")
        );
        g.insert_field("note", Field::new(note_text));
        g
    }
}

fn capitalize_key(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

/// The entire wrapper file for one scan: top `entry` plus sub-entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperFile {
    #[serde(skip)]
    path: PathBuf,
    pub root: Group,
}

impl WrapperFile {
    /// Create a fresh, empty wrapper at `path` (not yet saved).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut root = Group::new();
        root.insert_group("entry", Group::new());
        Self {
            path: path.into(),
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        let root: Group = serde_json::from_str(&data)?;
        Ok(Self { path, root })
    }

    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.root)?;
        std::fs::write(&self.path, data).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Names of sub-entries: every top-level group other than `entry`.
    ///
    /// Invariant (i) of spec §3: `entries(W) = {g in groups(W) | g != "entry"}`.
    pub fn entries(&self) -> Vec<String> {
        self.root
            .group_names()
            .filter(|n| *n != "entry")
            .map(str::to_string)
            .collect()
    }

    pub fn top_entry(&self) -> &Group {
        self.root.group("entry").expect("wrapper always has 'entry'")
    }

    pub fn top_entry_mut(&mut self) -> &mut Group {
        self.ensure_group("entry");
        self.root.get_mut("entry").unwrap().as_group_mut().unwrap()
    }

    pub fn entry(&self, name: &str) -> Option<&Group> {
        self.root.group(name)
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.root.get_mut(name).and_then(Node::as_group_mut)
    }

    fn ensure_group(&mut self, name: &str) {
        if !self.root.contains(name) {
            self.root.insert_group(name.to_string(), Group::new());
        }
    }

    pub fn ensure_entry(&mut self, name: &str) -> &mut Group {
        self.ensure_group(name);
        self.root.get_mut(name).unwrap().as_group_mut().unwrap()
    }

    /// Invariant (ii): a task is DONE iff its process record exists under
    /// the entry (or under top `entry` for aggregate tasks).
    pub fn has_process(&self, entry: &str, program: &str) -> bool {
        self.entry(entry)
            .map(|e| e.contains(program))
            .unwrap_or(false)
    }

    /// Write (replacing any prior) process record for `program` under `entry`.
    pub fn record(&mut self, entry: &str, record: ProcessRecord) {
        let group = self.ensure_entry(entry);
        group.remove(&record.program);
        let name = record.program.clone();
        group.insert_group(name, record.to_group());
    }

    /// Remove a process record (used by `overwrite` before re-running a stage).
    pub fn clear_process(&mut self, entry: &str, program: &str) {
        if let Some(group) = self.entry_mut(entry) {
            group.remove(program);
        }
    }

    pub fn sequence_index(&self, entry: &str) -> u32 {
        self.entry(entry)
            .map(|e| {
                e.children
                    .values()
                    .filter(|n| {
                        n.as_group()
                            .map(|g| g.contains("sequence_index"))
                            .unwrap_or(false)
                    })
                    .count() as u32
                    + 1
            })
            .unwrap_or(1)
    }

    /// Convenience accessor for a float scalar under an entry path.
    pub fn float_at(&self, entry: &str, path: &str) -> Option<f64> {
        let group = self.entry(entry)?;
        let node = crate::tree::walk(group, path)?;
        node.as_field()?.value.as_ref()?.as_f64()
    }

    pub fn set_attr(&mut self, entry: &str, node_path: &str, attr: &str, value: Value) {
        if let Some(group) = self.entry_mut(entry) {
            if let Some(field) = group_field_mut(group, node_path) {
                field.attrs.insert(attr.to_string(), value);
            }
        }
    }
}

fn group_field_mut<'a>(group: &'a mut Group, path: &str) -> Option<&'a mut Field> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }
    let last = segments.pop().unwrap();
    let mut current = group;
    for seg in segments {
        current = current.get_mut(seg)?.as_group_mut()?;
    }
    current.get_mut(last)?.as_field_mut()
}

impl Node {
    pub fn as_field_mut(&mut self) -> Option<&mut Field> {
        match self {
            Node::Field(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_excludes_top_entry() {
        let mut w = WrapperFile::new("/tmp/x.nxs");
        w.ensure_entry("f1");
        w.ensure_entry("f2");
        let mut entries = w.entries();
        entries.sort();
        assert_eq!(entries, vec!["f1", "f2"]);
    }

    #[test]
    fn record_and_has_process_round_trip() {
        let mut w = WrapperFile::new("/tmp/x.nxs");
        w.ensure_entry("f1");
        assert!(!w.has_process("f1", "nxlink"));
        w.record(
            "f1",
            ProcessRecord {
                program: "nxlink".into(),
                sequence_index: 1,
                version: "nxrefine v0.1.0".into(),
                machine: "host".into(),
                directory: "/data/f1".into(),
                parameters: BTreeMap::new(),
            },
        );
        assert!(w.has_process("f1", "nxlink"));
    }

    #[test]
    fn overwrite_clears_and_rerecords() {
        let mut w = WrapperFile::new("/tmp/x.nxs");
        w.ensure_entry("f1");
        w.record(
            "f1",
            ProcessRecord {
                program: "nxfind".into(),
                sequence_index: 1,
                version: "v1".into(),
                machine: "h".into(),
                directory: "d".into(),
                parameters: BTreeMap::new(),
            },
        );
        w.clear_process("f1", "nxfind");
        assert!(!w.has_process("f1", "nxfind"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_1.nxs");
        let mut w = WrapperFile::new(&path);
        w.ensure_entry("f1");
        w.save().unwrap();

        let loaded = WrapperFile::load(&path).unwrap();
        assert_eq!(loaded.entries(), vec!["f1".to_string()]);
    }
}
