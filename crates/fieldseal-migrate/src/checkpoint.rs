//! Resume point for interrupted migration runs.
//!
//! One JSON file holds an entry per `table/field`. The entry is advanced after
//! every fully committed batch and removed when a run completes, so a crash
//! leaves the offset of the first batch that still needs work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First row offset not yet committed
    pub next_offset: usize,
    pub batches_committed: u64,
    /// Unix timestamp of the last update
    pub updated_at: u64,
}

pub struct CheckpointStore {
    path: PathBuf,
    entries: BTreeMap<String, Checkpoint>,
    dirty: bool,
}

impl CheckpointStore {
    /// Load or create a checkpoint file. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading checkpoint: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing checkpoint: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, table: &str, field: &str) -> Option<&Checkpoint> {
        self.entries.get(&key(table, field))
    }

    pub fn set(&mut self, table: &str, field: &str, next_offset: usize, batches_committed: u64) {
        self.entries.insert(
            key(table, field),
            Checkpoint {
                next_offset,
                batches_committed,
                updated_at: now_secs(),
            },
        );
        self.dirty = true;
    }

    pub fn clear(&mut self, table: &str, field: &str) {
        if self.entries.remove(&key(table, field)).is_some() {
            self.dirty = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write pending changes atomically (temp file, then rename).
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating checkpoint dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.entries).context("serializing checkpoint")?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing checkpoint temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming checkpoint: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }
}

fn key(table: &str, field: &str) -> String {
    format!("{table}/{field}")
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_nonexistent_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(&dir.path().join("migration.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn set_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/migration.json");

        let mut store = CheckpointStore::open(&path).unwrap();
        store.set("items", "name", 300, 3);
        store.flush().unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reloaded = CheckpointStore::open(&path).unwrap();
        let cp = reloaded.get("items", "name").unwrap();
        assert_eq!(cp.next_offset, 300);
        assert_eq!(cp.batches_committed, 3);
        assert!(reloaded.get("items", "label").is_none());
    }

    #[test]
    fn clear_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.json");
        let mut store = CheckpointStore::open(&path).unwrap();
        store.set("items", "name", 100, 1);
        store.flush().unwrap();

        store.clear("items", "name");
        store.flush().unwrap();
        assert!(CheckpointStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(CheckpointStore::open(&path).is_err());
    }
}
