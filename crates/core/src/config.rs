//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Request handling never reads process-wide environment variables;
//! [`CoreConfig::from_lookup`] takes the lookup as a function so tests can supply their own.

use crate::constants::{
    DEFAULT_ADDR, DEFAULT_COMMAND_TIMEOUT, DEFAULT_DATA_DIR, DEFAULT_INDEX_PATH, ENV_ADDR,
    ENV_ADMIN_TOKEN, ENV_CHECKPOINT_SECS, ENV_COMMAND_TIMEOUT_SECS, ENV_DATA_DIR,
    ENV_INDEX_PATH, ENV_MAX_PAYLOAD_BYTES,
};
use crate::{CoreError, CoreResult};
use filestore_protocol::DEFAULT_MAX_PAYLOAD_BYTES;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    addr: SocketAddr,
    data_dir: PathBuf,
    index_path: PathBuf,
    command_timeout: Duration,
    max_payload_bytes: usize,
    admin_token: Option<String>,
    checkpoint_interval: Option<Duration>,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default limits, no admin token and no checkpointing.
    pub fn new(addr: SocketAddr, data_dir: PathBuf, index_path: PathBuf) -> Self {
        Self {
            addr,
            data_dir,
            index_path,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            admin_token: None,
            checkpoint_interval: None,
        }
    }

    /// Resolve configuration from `lookup`, which maps an environment variable name to
    /// its value. Unset and blank values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if a value is present but cannot be parsed, or
    /// if the command timeout is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let addr = value(ENV_ADDR)
            .unwrap_or_else(|| DEFAULT_ADDR.into())
            .parse::<SocketAddr>()
            .map_err(|e| CoreError::InvalidConfig(format!("{ENV_ADDR}: {e}")))?;
        let data_dir =
            PathBuf::from(value(ENV_DATA_DIR).unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let index_path =
            PathBuf::from(value(ENV_INDEX_PATH).unwrap_or_else(|| DEFAULT_INDEX_PATH.into()));

        let mut config = Self::new(addr, data_dir, index_path);

        if let Some(secs) =
            parse_number::<u64>(ENV_COMMAND_TIMEOUT_SECS, value(ENV_COMMAND_TIMEOUT_SECS))?
        {
            config = config.with_command_timeout(Duration::from_secs(secs))?;
        }
        if let Some(bytes) =
            parse_number::<usize>(ENV_MAX_PAYLOAD_BYTES, value(ENV_MAX_PAYLOAD_BYTES))?
        {
            config = config.with_max_payload_bytes(bytes)?;
        }
        if let Some(secs) = parse_number::<u64>(ENV_CHECKPOINT_SECS, value(ENV_CHECKPOINT_SECS))? {
            config = config.with_checkpoint_interval((secs > 0).then(|| Duration::from_secs(secs)));
        }
        config = config.with_admin_token(value(ENV_ADMIN_TOKEN));

        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `timeout` is zero.
    pub fn with_command_timeout(mut self, timeout: Duration) -> CoreResult<Self> {
        if timeout.is_zero() {
            return Err(CoreError::InvalidConfig(
                "command timeout must be greater than zero".into(),
            ));
        }
        self.command_timeout = timeout;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `bytes` does not fit a wire length.
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> CoreResult<Self> {
        if bytes > i32::MAX as usize {
            return Err(CoreError::InvalidConfig(format!(
                "max payload of {bytes} bytes exceeds the protocol limit of {}",
                i32::MAX
            )));
        }
        self.max_payload_bytes = bytes;
        Ok(self)
    }

    /// An empty token is treated as no token.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Option<Duration>) -> Self {
        self.checkpoint_interval = interval.filter(|i| !i.is_zero());
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval
    }
}

fn parse_number<T>(key: &str, value: Option<String>) -> CoreResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| CoreError::InvalidConfig(format!("{key}={v:?}: {e}")))
        })
        .transpose()
}
