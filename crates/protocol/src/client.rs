//! Async client for the filestore protocol.
//!
//! One [`Client`] holds one connection; requests on it are strictly sequential.

use crate::codec::{decode_response, encode_command, encode_tokens, ProtocolError};
use crate::message::{Command, Expect, Locator, Response};
use crate::DEFAULT_MAX_PAYLOAD_BYTES;
use tokio::io::BufStream;
use tokio::net::{TcpStream, ToSocketAddrs};

/// A connection to a filestore server.
#[derive(Debug)]
pub struct Client {
    stream: BufStream<TcpStream>,
    max_content: usize,
}

impl Client {
    /// Opens a connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Io`] if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufStream::new(stream),
            max_content: DEFAULT_MAX_PAYLOAD_BYTES,
        })
    }

    /// Raises or lowers the largest GET body this client accepts.
    pub fn with_max_content(mut self, max_content: usize) -> Self {
        self.max_content = max_content;
        self
    }

    /// Sends `command` and waits for its response.
    pub async fn request(&mut self, command: &Command) -> Result<Response, ProtocolError> {
        encode_command(&mut self.stream, command).await?;
        decode_response(&mut self.stream, command.expect(), self.max_content).await
    }

    pub async fn get(&mut self, locator: Locator) -> Result<Response, ProtocolError> {
        self.request(&Command::Get(locator)).await
    }

    /// Uploads `content`. An empty `name` lets the server choose one.
    pub async fn put(&mut self, name: &str, content: &[u8]) -> Result<Response, ProtocolError> {
        self.request(&Command::Put {
            target_name: name.to_owned(),
            payload: content.to_vec(),
        })
        .await
    }

    pub async fn delete(&mut self, locator: Locator) -> Result<Response, ProtocolError> {
        self.request(&Command::Delete(locator)).await
    }

    /// Asks the server to flush its index and shut down.
    pub async fn terminate(&mut self, token: &str) -> Result<Response, ProtocolError> {
        self.request(&Command::Terminate {
            token: token.to_owned(),
        })
        .await
    }

    /// Sends arbitrary tokens with no payload and reads a status-only response.
    pub async fn send_raw(&mut self, tokens: &[&str]) -> Result<Response, ProtocolError> {
        encode_tokens(&mut self.stream, tokens, None).await?;
        decode_response(&mut self.stream, Expect::StatusOnly, self.max_content).await
    }
}
