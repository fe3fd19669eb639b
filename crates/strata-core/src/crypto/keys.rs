//! Ed25519 key generation and verification-key distribution.
//!
//! The signing key never leaves the issuer process and is wiped on drop.
//! Distribution of the verification half is file-based: the issuer writes
//! the standard-base64 encoding of the 32-byte public key to a well-known
//! path, and resource services poll that path at startup with a bounded
//! number of attempts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH};
use thiserror::Error;

/// Errors from verification-key loading.
#[derive(Debug, Error)]
pub enum KeyError {
    /// I/O error reading or writing a key file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key file content is not valid base64.
    #[error("decode public key: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Decoded key has the wrong length.
    #[error("invalid public key size: {0}")]
    InvalidSize(usize),

    /// Decoded bytes are not a valid Ed25519 public key.
    #[error("invalid public key: {0}")]
    InvalidKey(#[from] ed25519_dalek::SignatureError),

    /// The key file did not appear within the polling budget.
    #[error("public key not available at {}", path.display())]
    NotAvailable {
        /// The path that was polled.
        path: PathBuf,
    },
}

/// Generates a fresh Ed25519 signing key from the OS entropy source.
#[must_use]
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Writes the standard-base64 encoding of `key` to `path` (mode 0644).
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_public_key(path: &Path, key: &VerifyingKey) -> Result<(), KeyError> {
    let encoded = STANDARD.encode(key.to_bytes());
    std::fs::write(path, encoded)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}

/// Reads a base64-encoded Ed25519 public key from `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, is not valid base64, or does not
/// decode to a 32-byte Ed25519 public key.
pub fn load_public_key(path: &Path) -> Result<VerifyingKey, KeyError> {
    let data = std::fs::read_to_string(path)?;
    let decoded = STANDARD.decode(data.trim())?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidSize(decoded.len()))?;
    Ok(VerifyingKey::from_bytes(&bytes)?)
}

/// Polls `path` until a valid public key appears, up to `attempts` tries
/// spaced `interval` apart.
///
/// Resource services call this at startup to wait for the issuer to publish
/// its key.
///
/// # Errors
///
/// Returns [`KeyError::NotAvailable`] if no valid key appeared within the
/// polling budget.
pub async fn wait_for_public_key(
    path: &Path,
    attempts: u32,
    interval: Duration,
) -> Result<VerifyingKey, KeyError> {
    for _ in 0..attempts {
        if let Ok(key) = load_public_key(path) {
            return Ok(key);
        }
        tokio::time::sleep(interval).await;
    }
    Err(KeyError::NotAvailable {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pub");
        let key = generate_keypair();

        write_public_key(&path, &key.verifying_key()).unwrap();
        let loaded = load_public_key(&path).unwrap();
        assert_eq!(loaded, key.verifying_key());
    }

    #[test]
    fn load_rejects_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pub");
        std::fs::write(&path, "not!!base64").unwrap();
        assert!(matches!(load_public_key(&path), Err(KeyError::Decode(_))));
    }

    #[test]
    fn load_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pub");
        std::fs::write(&path, STANDARD.encode([0u8; 16])).unwrap();
        assert!(matches!(
            load_public_key(&path),
            Err(KeyError::InvalidSize(16))
        ));
    }

    #[tokio::test]
    async fn wait_gives_up_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.pub");
        let err = wait_for_public_key(&path, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::NotAvailable { .. }));
    }

    #[tokio::test]
    async fn wait_picks_up_key_written_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pub");
        let key = generate_keypair();

        let writer_path = path.clone();
        let verifying = key.verifying_key();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            write_public_key(&writer_path, &verifying).unwrap();
        });

        let loaded = wait_for_public_key(&path, 50, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(loaded, key.verifying_key());
    }
}
