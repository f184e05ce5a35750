//! # Filestore Protocol
//!
//! Wire types and codec shared by the filestore server and its clients.
//!
//! Contains:
//! - The decoded request and response model ([`Command`], [`Response`])
//! - The length-prefixed codec over any tokio reader/writer (`codec` module)
//! - Admin token validation for the termination command (`auth` module)
//! - An async [`Client`] used by the CLI and the integration tests
//!
//! Used by `filestore-core` for dispatch and by `filestore-server` for sessions.

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod client;
pub mod codec;
mod message;

pub use client::Client;
pub use codec::{
    decode, decode_response, encode, encode_command, encode_tokens, ProtocolError,
    DEFAULT_MAX_PAYLOAD_BYTES, MAX_TOKENS, MAX_TOKEN_LEN,
};
pub use filestore_types::{FileId, FileName};
pub use message::{Command, Expect, Locator, Response, Status};
