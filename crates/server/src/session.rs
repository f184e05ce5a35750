//! Per-connection request loop.
//!
//! A session waits for the first byte of a command with no deadline, since an idle
//! persistent connection is legal. From that byte on, reading the rest of the command
//! and writing its response must each finish within the command timeout.
//!
//! When the stream breaks mid-command the session writes a bare 400 if it still can,
//! then closes. The socket halves are owned by this task and dropped on every exit path.

use crate::server::{wait_for_shutdown, ShutdownHandle};
use filestore_core::{FileService, SessionState};
use filestore_protocol::{codec, Response, Status};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::Instrument;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionSettings {
    pub command_timeout: Duration,
    pub max_payload_bytes: usize,
}

pub(crate) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<FileService>,
    handlers: Arc<Semaphore>,
    settings: SessionSettings,
    shutdown: ShutdownHandle,
) {
    let span = tracing::info_span!("session", %peer);
    serve(stream, service, handlers, settings, shutdown)
        .instrument(span)
        .await;
}

async fn serve(
    stream: TcpStream,
    service: Arc<FileService>,
    handlers: Arc<Semaphore>,
    settings: SessionSettings,
    shutdown: ShutdownHandle,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);
    let mut shutdown_rx = shutdown.subscribe();
    let mut handled = 0usize;

    loop {
        let more = tokio::select! {
            ready = reader.fill_buf() => match ready {
                Ok(buf) => !buf.is_empty(),
                Err(e) => {
                    tracing::warn!("read failed: {}", e);
                    false
                }
            },
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                tracing::debug!("server shutting down, closing idle session");
                false
            }
        };
        if !more {
            break;
        }

        let command = match timeout(
            settings.command_timeout,
            codec::decode(&mut reader, settings.max_payload_bytes),
        )
        .await
        {
            Ok(Ok(command)) => command,
            Ok(Err(e)) => {
                tracing::warn!("protocol error, closing session: {}", e);
                reply_best_effort(&mut writer, Status::BadRequest, settings.command_timeout).await;
                break;
            }
            Err(_) => {
                tracing::warn!(
                    "command not received within {:?}, closing session",
                    settings.command_timeout
                );
                reply_best_effort(&mut writer, Status::BadRequest, settings.command_timeout).await;
                break;
            }
        };

        let verb = command.verb();
        let permit = match Arc::clone(&handlers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!("server stopping, dropping {}: {}", verb, e);
                break;
            }
        };
        let svc = Arc::clone(&service);
        // The permit moves into the handler so shutdown can wait for it even if this
        // session is aborted first.
        let handler = move || {
            let _permit = permit;
            svc.handle(command)
        };
        let outcome = match tokio::task::spawn_blocking(handler).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{} handler failed: {}", verb, e);
                reply_best_effort(&mut writer, Status::BadRequest, settings.command_timeout).await;
                break;
            }
        };
        handled += 1;
        tracing::debug!(verb, status = outcome.response.status().code(), "handled command");

        match timeout(
            settings.command_timeout,
            codec::encode(&mut writer, &outcome.response),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("failed to send {} response: {}", verb, e);
                reply_best_effort(&mut writer, Status::BadRequest, settings.command_timeout).await;
                break;
            }
            Err(_) => {
                tracing::warn!("{} response not sent within {:?}", verb, settings.command_timeout);
                break;
            }
        }

        if outcome.next == SessionState::Terminate {
            tracing::info!("termination accepted, stopping server");
            shutdown.trigger();
            break;
        }
    }

    tracing::info!("connection closed after {} command(s)", handled);
}

/// Writes a status-only response, ignoring failures; the session is closing anyway.
async fn reply_best_effort<W>(writer: &mut W, status: Status, deadline: Duration)
where
    W: AsyncWrite + Unpin,
{
    let response = Response::Failed(status);
    match timeout(deadline, codec::encode(writer, &response)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("could not send {} before closing: {}", status, e),
        Err(_) => tracing::debug!("timed out sending {} before closing", status),
    }
}
