//! Persistent name → id index.
//!
//! [`IdIndex`] is the in-memory map every request consults. [`IndexStore`] loads it once
//! at startup and writes it back when asked; nothing is persisted between flushes, so a
//! crash loses every insert and remove since the last one.
//!
//! On disk the index is a JSON snapshot:
//!
//! ```text
//! {
//!   "version": 1,
//!   "saved_at": "2026-10-19T12:00:00Z",
//!   "entries": [ { "file_name": "a.txt", "id": 97 }, ... ]
//! }
//! ```

use crate::constants::INDEX_FORMAT_VERSION;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use filestore_types::{FileId, FileName};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// In-memory map from file name to id. Names are unique; ids are not checked here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdIndex {
    entries: BTreeMap<FileName, FileId>,
}

impl IdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_by_name(&self, name: &FileName) -> Option<FileId> {
        self.entries.get(name).copied()
    }

    /// Finds the name holding `id`. This is a linear scan.
    pub fn lookup_by_id(&self, id: FileId) -> Option<&FileName> {
        self.entries
            .iter()
            .find(|(_, entry_id)| **entry_id == id)
            .map(|(name, _)| name)
    }

    pub fn contains_name(&self, name: &FileName) -> bool {
        self.entries.contains_key(name)
    }

    /// Inserts or replaces the entry for `name`, returning the previous id.
    pub fn insert(&mut self, name: FileName, id: FileId) -> Option<FileId> {
        self.entries.insert(name, id)
    }

    pub fn remove(&mut self, name: &FileName) -> Option<FileId> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileName, FileId)> {
        self.entries.iter().map(|(name, id)| (name, *id))
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IndexEntry {
    file_name: FileName,
    id: FileId,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IndexSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Backing file for an [`IdIndex`].
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the index from the backing file, or returns an empty index if there is none.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IndexRead` if the file exists but cannot be read,
    /// `CoreError::IndexDecode` if it is not a valid snapshot, or
    /// `CoreError::IndexCorrupt` if the snapshot has an unknown version or lists a name
    /// twice.
    pub fn load(&self) -> CoreResult<IdIndex> {
        if !self.path.is_file() {
            tracing::info!(
                "no index found at {}, starting with an empty index",
                self.path.display()
            );
            return Ok(IdIndex::new());
        }

        let bytes = fs::read(&self.path).map_err(CoreError::IndexRead)?;
        let snapshot: IndexSnapshot =
            serde_json::from_slice(&bytes).map_err(CoreError::IndexDecode)?;

        if snapshot.version != INDEX_FORMAT_VERSION {
            return Err(CoreError::IndexCorrupt(format!(
                "unsupported index version {} (expected {})",
                snapshot.version, INDEX_FORMAT_VERSION
            )));
        }

        let mut index = IdIndex::new();
        for entry in snapshot.entries {
            if index.contains_name(&entry.file_name) {
                return Err(CoreError::IndexCorrupt(format!(
                    "duplicate entry for {}",
                    entry.file_name
                )));
            }
            index.insert(entry.file_name, entry.id);
        }

        tracing::info!(
            "loaded {} index entries from {} (saved {})",
            index.len(),
            self.path.display(),
            snapshot.saved_at
        );
        Ok(index)
    }

    /// Overwrites the backing file with the full contents of `index`.
    ///
    /// The snapshot is written to a sibling temporary file and renamed into place, so a
    /// failed flush leaves the previous snapshot intact.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IndexEncode` if serialisation fails, or
    /// `CoreError::IndexWrite` if the directory, temporary file or rename fails.
    pub fn flush(&self, index: &IdIndex) -> CoreResult<()> {
        let snapshot = IndexSnapshot {
            version: INDEX_FORMAT_VERSION,
            saved_at: Utc::now(),
            entries: index
                .iter()
                .map(|(name, id)| IndexEntry {
                    file_name: name.clone(),
                    id,
                })
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(CoreError::IndexEncode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                fs::create_dir_all(parent).map_err(CoreError::IndexWrite)?;
                tracing::info!("created index directory {}", parent.display());
            }
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes).map_err(CoreError::IndexWrite)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(CoreError::IndexWrite(e));
        }

        tracing::debug!(
            "flushed {} index entries to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
