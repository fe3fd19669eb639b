//! Filesystem service binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_core::config;
use strata_core::crypto::wait_for_public_key;
use strata_core::ipc::IpcServer;
use strata_core::revocation::RevocationStore;
use strata_fs::service::{FsService, SERVICE_NAME};

/// Strata filesystem service - capability-gated file access
#[derive(Parser, Debug)]
#[command(name = "strata-fs")]
#[command(version, about, long_about = None)]
struct Args {
    /// Runtime directory (overrides STRATA_RUNTIME_DIR)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let runtime_dir = config::runtime_dir(args.runtime_dir);
    info!(runtime_dir = %runtime_dir.display(), "starting");

    // Wait for the issuer to publish its verification key.
    let key_path = config::public_key_path(&runtime_dir);
    let public_key = wait_for_public_key(&key_path, 50, Duration::from_millis(100))
        .await
        .with_context(|| format!("loading issuer public key from {}", key_path.display()))?;
    info!("loaded issuer public key");

    let revocations = RevocationStore::open(&config::revocation_log_path(&runtime_dir, SERVICE_NAME))
        .context("opening revocation log")?;
    let service = Arc::new(FsService::new(public_key, revocations));
    let handles = service.handles();

    let server = IpcServer::bind(&config::socket_path(&runtime_dir, SERVICE_NAME))
        .context("binding service socket")?;
    info!(socket = %server.socket_path().display(), "ready");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run(service, shutdown).await?;

    handles.close_all();
    info!("shut down");
    Ok(())
}
