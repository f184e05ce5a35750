#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read index file: {0}")]
    IndexRead(std::io::Error),
    #[error("failed to write index file: {0}")]
    IndexWrite(std::io::Error),
    #[error("failed to deserialize index: {0}")]
    IndexDecode(serde_json::Error),
    #[error("failed to serialize index: {0}")]
    IndexEncode(serde_json::Error),
    #[error("index file is corrupt: {0}")]
    IndexCorrupt(String),
    #[error("file storage error: {0}")]
    Files(#[from] filestore_files::FilesError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
