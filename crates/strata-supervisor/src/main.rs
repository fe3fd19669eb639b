//! Supervisor: top-level process managing the Strata service lifecycle.
//!
//! Starts the issuer first (it publishes the verification key other
//! services load at startup), waits for its socket, then starts the
//! filesystem service. Exposes a small control socket for status queries.
//! On SIGINT/SIGTERM the children are terminated in reverse start order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::config;
use strata_core::ipc::{Dispatch, ErrorCode, IpcServer, PeerCredentials, Request, Response};

/// How long to wait for a child's socket to appear.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a child to exit after SIGTERM before killing it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Strata supervisor - manages the service lifecycle
#[derive(Parser, Debug)]
#[command(name = "strata-supervisor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Runtime directory (overrides STRATA_RUNTIME_DIR)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Children indexed by service name, in start order.
type Children = Arc<Mutex<Vec<(String, Child)>>>;

/// Control-socket dispatcher reporting child states.
struct SupervisorService {
    children: Children,
}

impl Dispatch for SupervisorService {
    async fn dispatch(&self, request: Request, _peer: &PeerCredentials) -> Response {
        match request.method.as_str() {
            "supervisor.status" => {
                let mut states = HashMap::new();
                states.insert("status".to_string(), json!("running"));
                let mut children = self.children.lock().await;
                for (name, child) in children.iter_mut() {
                    let state = match child.try_wait() {
                        Ok(None) => "running".to_string(),
                        Ok(Some(status)) => format!("exited ({status})"),
                        Err(e) => format!("unknown ({e})"),
                    };
                    states.insert(name.clone(), json!(state));
                }
                Response::success(request.req_id.clone(), json!(states))
            }
            other => Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                format!("unknown method: {other}"),
            ),
        }
    }
}

/// Locates a service binary: `STRATA_<NAME>_BIN` override first, then a
/// sibling of the supervisor executable, then `PATH`.
fn find_service_binary(name: &str) -> Result<PathBuf> {
    let env_key = format!(
        "STRATA_{}_BIN",
        name.trim_start_matches("strata-").to_uppercase()
    );
    if let Ok(bin) = std::env::var(&env_key) {
        if !bin.is_empty() {
            return Ok(PathBuf::from(bin));
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    bail!("binary {name:?} not found (set {env_key})")
}

/// Spawns a service child with the runtime directory in its environment.
fn start_service(name: &str, bin: &Path, runtime_dir: &Path) -> Result<Child> {
    let child = Command::new(bin)
        .env(config::RUNTIME_DIR_ENV, runtime_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(false)
        .spawn()
        .with_context(|| format!("starting {name}"))?;
    info!(service = name, pid = child.id(), "started");
    Ok(child)
}

/// Polls for `path` to exist, up to `timeout`.
async fn wait_for_path(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// SIGTERMs a child and waits for it, escalating to SIGKILL on timeout.
async fn stop_service(name: &str, child: &mut Child) {
    if let Some(pid) = child.id() {
        info!(service = name, pid, "stopping");
        #[allow(clippy::cast_possible_wrap)] // PIDs fit in i32.
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(service = name, "SIGTERM failed: {e}");
        }
    }
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => info!(service = name, %status, "stopped"),
        Ok(Err(e)) => warn!(service = name, "wait failed: {e}"),
        Err(_) => {
            warn!(service = name, "did not exit in time, killing");
            let _ = child.kill().await;
        }
    }
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
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&runtime_dir, std::fs::Permissions::from_mode(0o700))
            .context("restricting runtime directory")?;
    }
    info!(runtime_dir = %runtime_dir.display(), "starting");

    let children: Children = Arc::new(Mutex::new(Vec::new()));

    // Issuer first: it publishes the verification key.
    let issuer_bin = find_service_binary("strata-issuer")?;
    let issuer = start_service("issuer", &issuer_bin, &runtime_dir)?;
    children.lock().await.push(("issuer".to_string(), issuer));

    let issuer_sock = config::socket_path(&runtime_dir, "issuer");
    if !wait_for_path(&issuer_sock, STARTUP_TIMEOUT).await {
        bail!(
            "issuer service did not start (waiting for {})",
            issuer_sock.display()
        );
    }
    info!("issuer service ready");

    let fs_bin = find_service_binary("strata-fs")?;
    let fs = start_service("fs", &fs_bin, &runtime_dir)?;
    children.lock().await.push(("fs".to_string(), fs));

    let fs_sock = config::socket_path(&runtime_dir, "fs");
    if !wait_for_path(&fs_sock, STARTUP_TIMEOUT).await {
        bail!(
            "fs service did not start (waiting for {})",
            fs_sock.display()
        );
    }
    info!("fs service ready");

    let server = IpcServer::bind(&config::socket_path(&runtime_dir, "supervisor"))
        .context("binding control socket")?;
    info!(socket = %server.socket_path().display(), "all services running");

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

    let service = Arc::new(SupervisorService {
        children: Arc::clone(&children),
    });
    server.run(service, shutdown).await?;

    // Children stop in reverse start order so the issuer outlives its
    // dependents.
    let mut children = children.lock().await;
    for (name, child) in children.iter_mut().rev() {
        stop_service(name, child).await;
    }

    info!("shut down");
    Ok(())
}
