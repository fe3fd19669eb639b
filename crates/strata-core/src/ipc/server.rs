//! UDS server: accept loop and per-connection request dispatch.
//!
//! Each inbound connection is served on its own task; requests on a
//! connection are processed sequentially, so responses are emitted in
//! request order. Across connections no ordering is guaranteed.
//!
//! On shutdown the server stops accepting, closes the listening socket and
//! removes the socket file; connection tasks finish the request they are
//! processing and exit at the next frame boundary.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::credentials::PeerCredentials;
use super::framing::FrameCodec;
use super::types::{ErrorCode, Request, Response, PROTOCOL_VERSION};

/// A service's request dispatcher.
///
/// Implementations route a decoded [`Request`] to the matching operation
/// handler. The peer's kernel-reported credentials accompany every request
/// so internal endpoints can gate on the calling uid.
pub trait Dispatch: Send + Sync + 'static {
    /// Processes one request and produces the response to send back.
    fn dispatch(
        &self,
        request: Request,
        peer: &PeerCredentials,
    ) -> impl Future<Output = Response> + Send;
}

/// UDS server bound to a socket path.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Binds the server socket, replacing any stale socket file and creating
    /// the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn bind(socket_path: &Path) -> io::Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        debug!(path = %socket_path.display(), "IPC server bound");
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Returns the bound socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serves connections until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only on unrecoverable listener failures; individual
    /// connection errors are logged and do not stop the server.
    pub async fn run<D: Dispatch>(
        self,
        dispatcher: Arc<D>,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let dispatcher = Arc::clone(&dispatcher);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, dispatcher, shutdown).await;
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    debug!(path = %self.socket_path.display(), "IPC server shutting down");
                    break;
                }
            }
        }

        drop(self.listener);
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Serves one connection: read a frame, dispatch, write the response,
/// repeat until the peer disconnects or shutdown is requested.
async fn handle_connection<D: Dispatch>(
    stream: UnixStream,
    dispatcher: Arc<D>,
    shutdown: CancellationToken,
) {
    let peer = match PeerCredentials::from_stream(&stream) {
        Ok(peer) => peer,
        Err(e) => {
            warn!("failed to read peer credentials: {e}");
            return;
        }
    };

    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            () = shutdown.cancelled() => return,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("frame error: {e}");
                return;
            }
            // Peer closed the connection.
            None => return,
        };

        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                let response =
                    Response::failure("", ErrorCode::InvalidArgument, format!("bad request: {e}"));
                let _ = send(&mut framed, &response).await;
                return;
            }
        };

        let response = if request.v == PROTOCOL_VERSION {
            dispatcher.dispatch(request, &peer).await
        } else {
            Response::failure_with_details(
                request.req_id,
                ErrorCode::InvalidArgument,
                "unsupported protocol version",
                serde_json::json!({ "supported": PROTOCOL_VERSION }),
            )
        };

        if let Err(e) = send(&mut framed, &response).await {
            warn!("failed to send response: {e}");
            return;
        }
    }
}

async fn send(
    framed: &mut Framed<UnixStream, FrameCodec>,
    response: &Response,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json = serde_json::to_vec(response)?;
    framed.send(json).await?;
    Ok(())
}
