//! strata-ctl - command-line client for Strata services.
//!
//! Sends a single IPC request and prints the JSON response. The target
//! socket is inferred from the method's service prefix
//! (`fs.open` → `fs.sock`, `issuer.issue` → `issuer.sock`). The process
//! exits non-zero when the service denies the request.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use strata_core::config;
use strata_core::ipc::{send_request, Request};

/// strata-ctl - Strata command-line client
#[derive(Parser, Debug)]
#[command(name = "strata-ctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Runtime directory (overrides STRATA_RUNTIME_DIR)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Capability token attached to the request
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Request a new capability token from the issuer
    Issue {
        /// Target resource service (e.g. "fs")
        #[arg(long)]
        service: String,

        /// Legacy bare action names (repeatable)
        #[arg(long = "action")]
        actions: Vec<String>,

        /// Fully-qualified rights (repeatable)
        #[arg(long = "right")]
        rights: Vec<String>,

        /// Filesystem subtree the capability is confined to
        #[arg(long)]
        path_prefix: Option<String>,

        /// Request-rate bound, e.g. "2rps"
        #[arg(long)]
        rate_limit: Option<String>,

        /// Token lifetime in seconds (default 3600)
        #[arg(long)]
        ttl_seconds: Option<i64>,
    },

    /// Revoke a capability by id
    Revoke {
        /// The capability id to revoke
        capability_id: String,
    },

    /// Decode and inspect a token (debug aid)
    Introspect {
        /// The token string
        token: String,
    },

    /// Open a file through the fs service
    Open {
        /// Path to open
        path: String,
    },

    /// Read from a previously opened handle
    Read {
        /// Handle id returned by open
        handle: String,

        /// Byte offset to read from
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Number of bytes to read
        #[arg(long)]
        size: Option<u64>,
    },

    /// List a directory through the fs service
    List {
        /// Directory path
        path: String,
    },

    /// Query supervisor status
    Status,

    /// Send a raw method call with JSON params
    Call {
        /// Method name, "<service>.<action>"
        method: String,

        /// Parameters as a JSON object
        params: Option<String>,
    },
}

impl Commands {
    /// Resolves the command into `(method, params)`.
    fn into_call(self) -> Result<(String, Option<Value>)> {
        let call = match self {
            Self::Issue {
                service,
                actions,
                rights,
                path_prefix,
                rate_limit,
                ttl_seconds,
            } => {
                let mut params = Map::new();
                params.insert("service".into(), json!(service));
                if !actions.is_empty() {
                    params.insert("actions".into(), json!(actions));
                }
                if !rights.is_empty() {
                    params.insert("rights".into(), json!(rights));
                }
                if let Some(prefix) = path_prefix {
                    params.insert("path_prefix".into(), json!(prefix));
                }
                if let Some(rate) = rate_limit {
                    params.insert("rate_limit".into(), json!(rate));
                }
                if let Some(ttl) = ttl_seconds {
                    params.insert("ttl_seconds".into(), json!(ttl));
                }
                ("issuer.issue".to_string(), Some(Value::Object(params)))
            }
            Self::Revoke { capability_id } => (
                "issuer.revoke".to_string(),
                Some(json!({ "capability_id": capability_id })),
            ),
            Self::Introspect { token } => (
                "issuer.introspect".to_string(),
                Some(json!({ "token": token })),
            ),
            Self::Open { path } => ("fs.open".to_string(), Some(json!({ "path": path }))),
            Self::Read {
                handle,
                offset,
                size,
            } => {
                let mut params = Map::new();
                params.insert("handle".into(), json!(handle));
                params.insert("offset".into(), json!(offset));
                if let Some(size) = size {
                    params.insert("size".into(), json!(size));
                }
                ("fs.read".to_string(), Some(Value::Object(params)))
            }
            Self::List { path } => ("fs.list".to_string(), Some(json!({ "path": path }))),
            Self::Status => ("supervisor.status".to_string(), None),
            Self::Call { method, params } => {
                let params = params
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()
                    .map_err(|e| anyhow::anyhow!("invalid params JSON: {e}"))?;
                (method, params)
            }
        };
        Ok(call)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let runtime_dir = config::runtime_dir(cli.runtime_dir);
    let (method, params) = cli.command.into_call()?;

    // The method prefix names the target service and thus its socket.
    let Some((service, _)) = method.split_once('.') else {
        bail!("invalid method {method:?}: expected <service>.<action>");
    };
    let socket = config::socket_path(&runtime_dir, service);

    let mut request = Request::new(method.as_str(), params);
    if let Some(token) = cli.token {
        request = request.with_token(token);
    }

    let response = send_request(&socket, &request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_builds_expected_params() {
        let command = Commands::Issue {
            service: "fs".into(),
            actions: vec!["open".into()],
            rights: vec!["fs.read".into()],
            path_prefix: Some("/tmp".into()),
            rate_limit: None,
            ttl_seconds: Some(60),
        };
        let (method, params) = command.into_call().unwrap();
        assert_eq!(method, "issuer.issue");
        let params = params.unwrap();
        assert_eq!(params["service"], json!("fs"));
        assert_eq!(params["actions"], json!(["open"]));
        assert_eq!(params["rights"], json!(["fs.read"]));
        assert_eq!(params["path_prefix"], json!("/tmp"));
        assert!(params.get("rate_limit").is_none());
        assert_eq!(params["ttl_seconds"], json!(60));
    }

    #[test]
    fn call_rejects_bad_json() {
        let command = Commands::Call {
            method: "fs.open".into(),
            params: Some("{not json".into()),
        };
        assert!(command.into_call().is_err());
    }

    #[test]
    fn status_targets_supervisor() {
        let (method, params) = Commands::Status.into_call().unwrap();
        assert_eq!(method, "supervisor.status");
        assert!(params.is_none());
    }
}
