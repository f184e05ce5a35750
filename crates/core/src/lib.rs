//! # Filestore Core
//!
//! Storage state machine for the filestore server.
//!
//! This crate contains the request semantics and the state they act on:
//! - Startup configuration ([`CoreConfig`])
//! - The persistent name → id index ([`IdIndex`], [`IndexStore`])
//! - Command dispatch against the index and the file store ([`FileService`])
//!
//! **No transport concerns**: sockets, sessions and timeouts belong in `filestore-server`;
//! the wire format belongs in `filestore-protocol`.

pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod service;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use index::{IdIndex, IndexStore};
pub use service::{FileService, Outcome, SessionState};
