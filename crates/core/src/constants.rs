//! Constants used throughout the filestore core crate.
//!
//! This module contains default locations, limits and environment variable names so
//! that configuration parsing and documentation stay in one place.

use std::time::Duration;

/// Default listen address: loopback only.
pub const DEFAULT_ADDR: &str = "127.0.0.1:23456";

/// Default directory for stored files, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default location of the persisted id index, relative to the working directory.
pub const DEFAULT_INDEX_PATH: &str = "id-index/index.bin";

/// Default deadline for reading one command and writing its response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Version written into every index snapshot.
pub const INDEX_FORMAT_VERSION: u32 = 1;

pub const ENV_ADDR: &str = "FILESTORE_ADDR";
pub const ENV_DATA_DIR: &str = "FILESTORE_DATA_DIR";
pub const ENV_INDEX_PATH: &str = "FILESTORE_INDEX_PATH";
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "FILESTORE_COMMAND_TIMEOUT_SECS";
pub const ENV_MAX_PAYLOAD_BYTES: &str = "FILESTORE_MAX_PAYLOAD_BYTES";
pub const ENV_ADMIN_TOKEN: &str = "FILESTORE_ADMIN_TOKEN";
pub const ENV_CHECKPOINT_SECS: &str = "FILESTORE_CHECKPOINT_SECS";
