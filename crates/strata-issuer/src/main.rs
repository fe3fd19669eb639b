//! Issuer service binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_core::config;
use strata_core::crypto::{generate_keypair, write_public_key};
use strata_core::ipc::IpcServer;
use strata_core::revocation::RevocationStore;
use strata_issuer::notifier::RevocationNotifier;
use strata_issuer::service::{IssuerService, SERVICE_NAME};

/// Strata issuer service - capability token minting and revocation
#[derive(Parser, Debug)]
#[command(name = "strata-issuer")]
#[command(version, about, long_about = None)]
struct Args {
    /// Runtime directory (overrides STRATA_RUNTIME_DIR)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Resource services to notify on revocation
    #[arg(long = "resource-service", default_values_t = vec![String::from("fs")])]
    resource_services: Vec<String>,

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
    std::fs::create_dir_all(&runtime_dir).context("creating runtime directory")?;
    info!(runtime_dir = %runtime_dir.display(), "starting");

    // The signing key lives for this process only; the verification half is
    // published for resource services to load at startup.
    let signing_key = generate_keypair();
    let key_path = config::public_key_path(&runtime_dir);
    write_public_key(&key_path, &signing_key.verifying_key())
        .with_context(|| format!("publishing public key to {}", key_path.display()))?;
    info!(path = %key_path.display(), "public key published");

    let revocations =
        RevocationStore::open(&config::revocation_log_path(&runtime_dir, SERVICE_NAME))
            .context("opening revocation log")?;
    let notifier = RevocationNotifier::new(runtime_dir.clone(), args.resource_services);
    let service = Arc::new(IssuerService::new(signing_key, revocations, notifier));

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

    info!("shut down");
    Ok(())
}
