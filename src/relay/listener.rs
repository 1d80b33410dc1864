//! Listening endpoint for the relay socket.
//!
//! Uses a Unix `SOCK_SEQPACKET` socket: connection-oriented like a stream,
//! but each client send arrives as one discrete unit, so a completed read is
//! a complete frame. mio's own net types are stream-only, so the socket is
//! built with socket2 and registered through `SourceFd`.

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use socket2::{Domain, SockAddr, Socket, Type};
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Pending connections the kernel holds while the loop is busy elsewhere.
/// This is what keeps a burst of near-simultaneous connects from being
/// dropped between two accepts.
const BACKLOG: i32 = 64;

/// The relay's listening endpoint.
///
/// Exactly one exists per relay. The endpoint persists across accepts; the
/// kernel backlog stands in for the replacement-endpoint dance a
/// one-client-per-instance transport would need.
pub(crate) struct Listener {
    socket: Socket,
    path: PathBuf,
}

impl Listener {
    /// Bind the well-known relay socket and start listening.
    ///
    /// A stale socket file left by an unclean shutdown is removed first.
    /// Failure here is unrecoverable for the relay; the caller logs and
    /// exits.
    pub(crate) fn bind(path: &Path) -> io::Result<Listener> {
        if path.exists() {
            fs::remove_file(path)?;
        }

        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::unix(path)?)?;
        socket.listen(BACKLOG)?;

        Ok(Listener {
            socket,
            path: path.to_path_buf(),
        })
    }

    /// Register the listening socket with the event loop.
    pub(crate) fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let fd = self.socket.as_raw_fd();
        registry.register(&mut SourceFd(&fd), token, Interest::READABLE)
    }

    /// Accept one pending client, if any.
    ///
    /// Returns `Ok(None)` once the accept queue is drained. The accepted
    /// socket is switched to non-blocking before it is handed over.
    pub(crate) fn accept(&self) -> io::Result<Option<Socket>> {
        match self.socket.accept() {
            Ok((socket, _addr)) => {
                socket.set_nonblocking(true)?;
                Ok(Some(socket))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Path of the bound socket file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Leave no stale socket file behind; a failure here only matters at
        // the next bind, which unlinks anyway.
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(path: &Path) -> Socket {
        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None).unwrap();
        socket.connect(&SockAddr::unix(path).unwrap()).unwrap();
        socket
    }

    #[test]
    fn test_bind_creates_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");

        let listener = Listener::bind(&path).unwrap();
        assert!(path.exists());
        assert_eq!(listener.path(), path);
    }

    #[test]
    fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");

        // A plain file stands in for a socket left by an unclean shutdown.
        fs::write(&path, b"stale").unwrap();
        let listener = Listener::bind(&path).unwrap();
        assert!(path.exists());
        drop(listener);
    }

    #[test]
    fn test_drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");

        let listener = Listener::bind(&path).unwrap();
        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn test_accept_drains_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = Listener::bind(&path).unwrap();

        // Nothing pending yet.
        assert!(listener.accept().unwrap().is_none());

        let _client_a = connect(&path);
        let _client_b = connect(&path);

        assert!(listener.accept().unwrap().is_some());
        assert!(listener.accept().unwrap().is_some());
        assert!(listener.accept().unwrap().is_none());
    }
}
