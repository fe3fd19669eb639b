//! Runtime directory configuration.
//!
//! A single environment variable, [`RUNTIME_DIR_ENV`], roots all on-host
//! paths: service sockets, the published verification key, and persisted
//! revocation logs.

use std::path::{Path, PathBuf};

/// Environment variable overriding the runtime directory.
pub const RUNTIME_DIR_ENV: &str = "STRATA_RUNTIME_DIR";

/// Default runtime directory when the environment variable is unset.
pub const DEFAULT_RUNTIME_DIR: &str = "/run/strata";

/// Name of the published verification key file.
pub const PUBLIC_KEY_FILE: &str = "identity.pub";

/// Resolves the runtime directory: explicit override first, then the
/// environment, then [`DEFAULT_RUNTIME_DIR`].
#[must_use]
pub fn runtime_dir(override_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir;
    }
    match std::env::var(RUNTIME_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_RUNTIME_DIR),
    }
}

/// Path of a service's Unix socket under the runtime directory.
#[must_use]
pub fn socket_path(runtime_dir: &Path, service: &str) -> PathBuf {
    runtime_dir.join(format!("{service}.sock"))
}

/// Path of the published verification key under the runtime directory.
#[must_use]
pub fn public_key_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(PUBLIC_KEY_FILE)
}

/// Path of a service's append-only revocation log under the runtime
/// directory.
#[must_use]
pub fn revocation_log_path(runtime_dir: &Path, service: &str) -> PathBuf {
    runtime_dir.join(format!("{service}.revoked.log"))
}
