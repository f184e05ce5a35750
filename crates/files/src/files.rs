//! Flat file storage service implementation
//!
//! This module provides [`FileStore`], the only component that touches stored bytes.
//!
//! # Path Resolution
//!
//! Every operation takes a [`FileName`], which is guaranteed to be a single path
//! component. [`FileStore::resolve`] joins it onto the storage directory, so no
//! operation can reach outside that directory.
//!
//! # Create-only Writes
//!
//! [`FileStore::write`] opens the target with `create_new`, which makes the existence
//! check and the creation a single filesystem operation. Two concurrent writers of the
//! same name cannot both succeed; the loser sees [`FilesError::AlreadyExists`].
//!
//! # Implementation Notes
//!
//! - The store is stateless apart from its directory path and is cheap to clone
//! - The storage directory is created on first write, not at construction
//! - Directories inside the storage directory are never treated as stored files

use crate::FilesError;
use filestore_types::FileName;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Service for reading and writing stored files
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory holding one file per stored name
    storage_dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `storage_dir`.
    ///
    /// No I/O is performed; the directory is created on first write.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    /// Returns the storage directory
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Maps a validated name to its absolute location inside the storage directory.
    #[must_use]
    pub fn resolve(&self, name: &FileName) -> PathBuf {
        self.storage_dir.join(name.as_str())
    }

    /// Creates the storage directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the directory cannot be created, or if the path
    /// exists and is not a directory.
    pub fn ensure_storage_dir(&self) -> Result<(), FilesError> {
        if self.storage_dir.is_dir() {
            return Ok(());
        }

        fs::create_dir_all(&self.storage_dir).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create storage directory {}: {}",
                    self.storage_dir.display(),
                    e
                ),
            ))
        })?;
        tracing::info!("created storage directory {}", self.storage_dir.display());

        Ok(())
    }

    /// Returns whether a regular file is stored under `name`.
    pub fn exists(&self, name: &FileName) -> bool {
        self.resolve(name).is_file()
    }

    /// Reads the full contents of the file stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if nothing is stored under `name`, or
    /// `FilesError::Io` if the file exists but cannot be read.
    pub fn read(&self, name: &FileName) -> Result<Vec<u8>, FilesError> {
        let path = self.resolve(name);

        if !path.is_file() {
            return Err(FilesError::NotFound(name.to_string()));
        }

        fs::read(&path).map_err(|e| match e.kind() {
            // Removed between the check and the read.
            ErrorKind::NotFound => FilesError::NotFound(name.to_string()),
            _ => FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read file from {}: {}", path.display(), e),
            )),
        })
    }

    /// Stores `content` under `name`.
    ///
    /// Files are immutable: if anything already exists at the resolved path the write is
    /// refused and the existing content is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::AlreadyExists` if `name` is taken, or `FilesError::Io` if
    /// the storage directory or the file cannot be written. A partially written file is
    /// removed before the error is returned.
    pub fn write(&self, name: &FileName, content: &[u8]) -> Result<(), FilesError> {
        self.ensure_storage_dir()?;

        let path = self.resolve(name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FilesError::AlreadyExists(name.to_string()));
            }
            Err(e) => {
                return Err(FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create file {}: {}", path.display(), e),
                )));
            }
        };

        if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path) {
                tracing::warn!(
                    "failed to remove partial file {}: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write file to {}: {}", path.display(), e),
            )));
        }

        Ok(())
    }

    /// Removes the file stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if there was nothing to delete, or
    /// `FilesError::Io` if the removal itself fails.
    pub fn delete(&self, name: &FileName) -> Result<(), FilesError> {
        let path = self.resolve(name);

        if !path.is_file() {
            return Err(FilesError::NotFound(name.to_string()));
        }

        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FilesError::NotFound(name.to_string()),
            _ => FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to delete file {}: {}", path.display(), e),
            )),
        })
    }
}
