//! Peer credential extraction from Unix sockets via `SO_PEERCRED`.
//!
//! The kernel reports the uid/gid/pid of the connecting process; unlike
//! anything carried in the request body, these cannot be forged by the
//! peer. Services use them to gate internal endpoints.

use std::io;

use tokio::net::UnixStream;

/// Peer credentials extracted from a Unix socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCredentials {
    /// User ID of the peer process.
    pub uid: u32,
    /// Group ID of the peer process.
    pub gid: u32,
    /// Process ID of the peer process, when the platform reports one.
    pub pid: Option<i32>,
}

impl PeerCredentials {
    /// Extracts credentials from a connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SO_PEERCRED` query fails.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        let creds = stream.peer_cred()?;
        Ok(Self {
            uid: creds.uid(),
            gid: creds.gid(),
            pid: creds.pid(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream as StdUnixStream;

    use nix::unistd::{getgid, getuid};
    use tokio::net::UnixStream as TokioUnixStream;

    use super::*;

    #[tokio::test]
    async fn socketpair_reports_own_credentials() {
        let (s1, s2) = StdUnixStream::pair().unwrap();
        s1.set_nonblocking(true).unwrap();
        s2.set_nonblocking(true).unwrap();
        let ts1 = TokioUnixStream::from_std(s1).unwrap();
        let _ts2 = TokioUnixStream::from_std(s2).unwrap();

        let creds = PeerCredentials::from_stream(&ts1).unwrap();
        assert_eq!(creds.uid, getuid().as_raw());
        assert_eq!(creds.gid, getgid().as_raw());
    }
}
