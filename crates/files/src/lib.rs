//! Filestore File Storage
//!
//! This crate owns the bytes of every stored file. It knows nothing about ids or the
//! index; callers address files by a validated [`FileName`].
//!
//! ## Storage Model
//!
//! ```text
//! <storage_dir>/
//! ├── report.pdf
//! ├── newFile1.dat
//! └── newFile2.dat
//! ```
//!
//! - The layout is flat: one file per name, no sharding, no metadata sidecars
//! - Files are create-only; a second write to the same name fails
//! - The storage directory is created lazily on first use
//!
//! ## Example Usage
//!
//! ```no_run
//! use filestore_files::{FileName, FileStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new("data");
//! let name = FileName::parse("hello.txt")?;
//! store.write(&name, b"hello")?;
//! assert_eq!(store.read(&name)?, b"hello");
//! # Ok(())
//! # }
//! ```

mod files;

pub use filestore_types::{FileName, NameError};
pub use files::FileStore;

/// Errors that can occur during file operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// The name could not be turned into a safe storage path
    #[error("Invalid file name: {0}")]
    InvalidName(#[from] NameError),

    /// No file is stored under this name
    #[error("File not found: {0}")]
    NotFound(String),

    /// A file is already stored under this name (create-only violation)
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
