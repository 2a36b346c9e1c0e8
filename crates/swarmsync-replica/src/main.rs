//! # SwarmSync Replica
//!
//! Runs one replica over stdin/stdout. Requests are read one per line;
//! see [`swarmsync_replica::runtime`] for the protocol.

use anyhow::{bail, Context, Result};
use swarmsync_replica::{
    runtime, LogSink, MemoryStore, Replica, ReplicaConfig, ReplicaStore, SqliteStore,
};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout carries protocol replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting SwarmSync replica"
    );

    let config = ReplicaConfig::from_env()?;

    match config.persistence.store_type.as_str() {
        "sqlite" => {
            let store = SqliteStore::open(&config.persistence.db_path).with_context(|| {
                format!(
                    "Failed to open database {}",
                    config.persistence.db_path.display()
                )
            })?;
            serve(&config, store).await
        }
        "memory" => serve(&config, MemoryStore::new()).await,
        other => bail!("Unknown SWARMSYNC_STORE {other:?}, expected \"sqlite\" or \"memory\""),
    }
}

async fn serve<S: ReplicaStore>(config: &ReplicaConfig, store: S) -> Result<()> {
    let mut replica =
        Replica::open(config, store, LogSink).context("Failed to restore replica state")?;

    tracing::info!(origin = %replica.origin(), "Replica initialized");

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    runtime::run(
        &mut replica,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await
}
