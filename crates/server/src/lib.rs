//! # Filestore Server
//!
//! TCP front end for `filestore-core`.
//!
//! Handles:
//! - Accepting connections and running one session task per connection
//! - Per-command deadlines and best-effort error replies on broken sessions
//! - Shutdown, either from an authorised TERMINATE or from the host process
//! - Optional periodic index checkpoints
//!
//! Uses `filestore-protocol` for the wire format.

#![warn(rust_2018_idioms)]

pub use server::{Server, ServerError, ShutdownHandle};

pub mod server;
mod session;
