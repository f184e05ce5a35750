//! Connection acceptor.

use crate::session::{self, SessionSettings};
use filestore_core::{CoreConfig, CoreError, FileService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Upper bound on command handlers running at once across all sessions.
pub(crate) const MAX_IN_FLIGHT_HANDLERS: u32 = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Stops a running [`Server`]. Cloning is cheap; every clone stops the same server.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Asks the server to stop accepting connections and shut down.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once `rx` has seen a shutdown request.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    // The sender lives in the handle, which outlives every receiver, so `Err` only
    // happens during teardown; treat it as a shutdown too.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// A bound filestore server.
pub struct Server {
    listener: TcpListener,
    service: Arc<FileService>,
    config: CoreConfig,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Opens storage, loads the index and binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Core` if the storage directory or index cannot be opened,
    /// or `ServerError::Bind` if the address is unavailable.
    pub async fn bind(config: CoreConfig) -> Result<Self, ServerError> {
        let service = Arc::new(FileService::open(&config)?);
        let listener = TcpListener::bind(config.addr())
            .await
            .map_err(ServerError::Bind)?;

        Ok(Self {
            listener,
            service,
            config,
            shutdown: ShutdownHandle::new(),
        })
    }

    /// # Errors
    ///
    /// Returns the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn service(&self) -> Arc<FileService> {
        Arc::clone(&self.service)
    }

    /// Accepts connections until shutdown is requested, then drains sessions and
    /// flushes the index.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Core` if the final index flush fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            service,
            config,
            shutdown,
        } = self;

        match listener.local_addr() {
            Ok(addr) => tracing::info!("++ filestore listening on {}", addr),
            Err(e) => tracing::warn!("filestore listening on unknown address: {}", e),
        }

        let settings = SessionSettings {
            command_timeout: config.command_timeout(),
            max_payload_bytes: config.max_payload_bytes(),
        };

        let checkpoint = config.checkpoint_interval().map(|interval| {
            tracing::info!("checkpointing index every {:?}", interval);
            tokio::spawn(checkpoint_loop(
                Arc::clone(&service),
                interval,
                shutdown.subscribe(),
            ))
        });

        let handlers = Arc::new(Semaphore::new(MAX_IN_FLIGHT_HANDLERS as usize));
        let mut sessions = JoinSet::new();
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("accepted connection from {}", peer);
                        sessions.spawn(session::run(
                            stream,
                            peer,
                            Arc::clone(&service),
                            Arc::clone(&handlers),
                            settings,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        // Usually fd exhaustion; back off instead of spinning.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!("session task failed: {}", e);
                    }
                }
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }
        }

        tracing::info!("shutting down, waiting for {} open session(s)", sessions.len());
        drop(listener);

        // Idle sessions exit on the shutdown signal; give busy ones one command's worth
        // of time to finish before cutting them off.
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(settings.command_timeout, drain).await.is_err() {
            tracing::warn!("aborting {} session(s) still running", sessions.len());
            sessions.shutdown().await;
        }

        // Aborted sessions leave their blocking handlers running; their index changes
        // must be in the final flush.
        wait_for_handlers(&handlers).await;

        if let Some(checkpoint) = checkpoint {
            join_checkpoint(checkpoint).await;
        }

        let svc = Arc::clone(&service);
        tokio::task::spawn_blocking(move || svc.flush_index()).await??;
        tracing::info!("-- index flushed ({} entries), server stopped", service.index_len());

        Ok(())
    }
}

/// Resolves once no command handler holds a permit from `handlers`.
pub(crate) async fn wait_for_handlers(handlers: &Semaphore) {
    match handlers.acquire_many(MAX_IN_FLIGHT_HANDLERS).await {
        Ok(_all) => {}
        Err(e) => tracing::warn!("handler gate closed: {}", e),
    }
}

/// Waits for the checkpoint task. A failed task is logged; the final flush still runs.
async fn join_checkpoint(checkpoint: tokio::task::JoinHandle<()>) {
    if let Err(e) = checkpoint.await {
        tracing::error!("index checkpoint task failed: {}", e);
    }
}

async fn checkpoint_loop(
    service: Arc<FileService>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; there is nothing to save yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let svc = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || svc.flush_index()).await {
                    Ok(Ok(())) => tracing::debug!("index checkpoint written"),
                    Ok(Err(e)) => tracing::error!("index checkpoint failed: {}", e),
                    Err(e) => tracing::error!("index checkpoint task failed: {}", e),
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_wait_for_handlers_outlives_aborted_session() {
        let handlers = Arc::new(Semaphore::new(MAX_IN_FLIGHT_HANDLERS as usize));
        let finished = Arc::new(AtomicBool::new(false));

        let permit = Arc::clone(&handlers).acquire_owned().await.unwrap();
        let done = Arc::clone(&finished);
        let session = tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                std::thread::sleep(Duration::from_millis(200));
                done.store(true, Ordering::SeqCst);
            })
            .await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.abort();

        wait_for_handlers(&handlers).await;

        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_join_checkpoint_survives_panicked_task() {
        let checkpoint = tokio::spawn(async { panic!("checkpoint blew up") });

        join_checkpoint(checkpoint).await;
    }

    #[tokio::test]
    async fn test_wait_for_handlers_returns_when_idle() {
        let handlers = Semaphore::new(MAX_IN_FLIGHT_HANDLERS as usize);

        tokio::time::timeout(Duration::from_secs(1), wait_for_handlers(&handlers))
            .await
            .unwrap();
    }
}
