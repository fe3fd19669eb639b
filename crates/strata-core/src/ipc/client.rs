//! One-shot IPC client: connect, send one request, read one response.
//!
//! Used by the CLI, the issuer's revocation fan-out, the supervisor's
//! readiness checks, and tests. Long-lived client connections can reuse the
//! same [`FrameCodec`] directly.

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::framing::{FrameCodec, FramingError};
use super::types::{Request, Response};

/// Errors from a one-shot client exchange.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect to the service socket.
    #[error("connect {}: {source}", path.display())]
    Connect {
        /// The socket path dialed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Frame-level transport error.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Envelope failed to encode or decode.
    #[error("envelope encoding: {0}")]
    Serde(#[from] serde_json::Error),

    /// The service closed the connection before responding.
    #[error("connection closed before response")]
    ConnectionClosed,
}

/// Connects to `socket_path`, sends `request`, and reads a single response.
///
/// # Errors
///
/// Returns a [`ClientError`] if the socket is unreachable, the exchange
/// fails, or the connection closes early.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Response, ClientError> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|source| ClientError::Connect {
            path: socket_path.to_path_buf(),
            source,
        })?;
    let mut framed = Framed::new(stream, FrameCodec::new());

    framed.send(serde_json::to_vec(request)?).await?;

    let frame = framed
        .next()
        .await
        .ok_or(ClientError::ConnectionClosed)??;
    Ok(serde_json::from_slice(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sock");
        let err = send_request(&path, &Request::new("svc.ping", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
