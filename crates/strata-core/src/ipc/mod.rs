//! Length-prefixed JSON IPC over Unix domain sockets.
//!
//! Every Strata service speaks the same wire protocol:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Request / Response envelope       │  JSON (types)
//! ├─────────────────────────────────────────┤
//! │               Framing                    │  4-byte BE length prefix
//! ├─────────────────────────────────────────┤
//! │            UDS transport                 │  Unix socket
//! └─────────────────────────────────────────┘
//! ```
//!
//! Connections are long-lived; multiple requests traverse one connection
//! sequentially and responses are emitted in request order. Frames are
//! capped at [`MAX_FRAME_SIZE`] (1 MiB), validated before allocation.

pub mod client;
pub mod credentials;
pub mod framing;
pub mod server;
pub mod types;

pub use client::{send_request, ClientError};
pub use credentials::PeerCredentials;
pub use framing::{FrameCodec, FramingError, MAX_FRAME_SIZE};
pub use server::{Dispatch, IpcServer};
pub use types::{
    decode_params, Auth, ErrorBody, ErrorCode, Request, Response, PROTOCOL_VERSION,
};
