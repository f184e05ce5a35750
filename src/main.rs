use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filestore_core::CoreConfig;
use filestore_server::Server;

/// Main entry point for the filestore server
///
/// Resolves configuration once from the environment (and `.env`, if present), binds the
/// listener and serves until an authorised TERMINATE arrives or the process receives
/// Ctrl-C. Either way the index is flushed before exit.
///
/// # Environment Variables
/// - `FILESTORE_ADDR`: listen address (default: "127.0.0.1:23456")
/// - `FILESTORE_DATA_DIR`: directory holding stored files (default: "data")
/// - `FILESTORE_INDEX_PATH`: index file (default: "id-index/index.bin")
/// - `FILESTORE_COMMAND_TIMEOUT_SECS`: per-command deadline (default: 30)
/// - `FILESTORE_MAX_PAYLOAD_BYTES`: largest accepted PUT body (default: 64 MiB)
/// - `FILESTORE_ADMIN_TOKEN`: token required by TERMINATE; unset disables it
/// - `FILESTORE_CHECKPOINT_SECS`: periodic index flush interval; unset disables it
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filestore=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::from_lookup(|key| std::env::var(key).ok())
        .context("invalid filestore configuration")?;

    tracing::info!(
        "++ Starting filestore (data: {}, index: {})",
        config.data_dir().display(),
        config.index_path().display()
    );
    if config.admin_token().is_none() {
        tracing::warn!("FILESTORE_ADMIN_TOKEN is not set; remote termination is disabled");
    }

    let server = Server::bind(config)
        .await
        .context("failed to start filestore server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                shutdown.trigger();
            }
            Err(e) => tracing::warn!("cannot listen for interrupt: {}", e),
        }
    });

    server.run().await?;

    Ok(())
}
