//! One-shot client connections and the set of live ones.
//!
//! Every connection delivers exactly one frame: accept, read once, decode,
//! close. The read buffer is owned by the connection and sized to the
//! maximum frame; it is never reset for reuse because the connection never
//! survives its message.

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use slab::Slab;
use socket2::Socket;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;

/// Outcome of servicing a connection's read readiness.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A full frame arrived; holds the number of bytes received.
    Complete(usize),
    /// Spurious wakeup, nothing to read yet. The connection stays armed.
    Pending,
    /// The client went away before sending a frame.
    Closed,
}

/// A single accepted client, alive for exactly one message.
pub(crate) struct Connection {
    socket: Socket,
    buf: Box<[u8]>,
}

impl Connection {
    pub(crate) fn new(socket: Socket, max_frame_size: usize) -> Self {
        Self {
            socket,
            buf: vec![0u8; max_frame_size].into_boxed_slice(),
        }
    }

    /// Register this connection's socket under its set key.
    pub(crate) fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let fd = self.socket.as_raw_fd();
        registry.register(&mut SourceFd(&fd), token, Interest::READABLE)
    }

    /// Remove this connection's socket from the wait set.
    pub(crate) fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let fd = self.socket.as_raw_fd();
        registry.deregister(&mut SourceFd(&fd))
    }

    /// Perform the connection's one read.
    ///
    /// The transport is packet-oriented, so a successful read delivers one
    /// whole frame (truncated to the buffer if the client sent more — that
    /// happens before the relay sees it).
    pub(crate) fn read_frame(&mut self) -> io::Result<ReadOutcome> {
        match self.socket.read(&mut self.buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Complete(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Pending),
            Err(e) => Err(e),
        }
    }

    /// The received bytes of a completed read.
    pub(crate) fn received(&self, len: usize) -> &[u8] {
        &self.buf[..len]
    }
}

/// Set of live connections, keyed by poll token.
///
/// Slab keys are stable for a connection's lifetime and O(1) to insert and
/// remove. The capacity bound is a resource policy, not a platform constant;
/// it comes from configuration.
pub(crate) struct ConnectionSet {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionSet {
    pub(crate) fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection, returning its key.
    ///
    /// Returns `None` at capacity; the caller drops the connection, which
    /// closes the client's socket.
    pub(crate) fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub(crate) fn get_mut(&mut self, key: usize) -> Option<&mut Connection> {
        self.connections.get_mut(key)
    }

    /// Remove a connection, taking ownership so the caller can deregister
    /// before the socket drops.
    pub(crate) fn remove(&mut self, key: usize) -> Option<Connection> {
        if self.connections.contains(key) {
            Some(self.connections.remove(key))
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Type};

    fn seqpacket_pair() -> (Socket, Socket) {
        Socket::pair(Domain::UNIX, Type::SEQPACKET, None).unwrap()
    }

    fn one_shot(local: Socket) -> Connection {
        local.set_nonblocking(true).unwrap();
        Connection::new(local, 256)
    }

    #[test]
    fn test_read_frame_complete() {
        let (local, remote) = seqpacket_pair();
        let mut conn = one_shot(local);

        remote.send(b"\x03\x00\x00\x00disk low").unwrap();

        match conn.read_frame().unwrap() {
            ReadOutcome::Complete(n) => {
                assert_eq!(conn.received(n), b"\x03\x00\x00\x00disk low");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_read_frame_pending_when_no_data() {
        let (local, _remote) = seqpacket_pair();
        let mut conn = one_shot(local);

        assert!(matches!(conn.read_frame().unwrap(), ReadOutcome::Pending));
    }

    #[test]
    fn test_read_frame_closed_on_disconnect() {
        let (local, remote) = seqpacket_pair();
        let mut conn = one_shot(local);

        drop(remote);
        assert!(matches!(conn.read_frame().unwrap(), ReadOutcome::Closed));
    }

    #[test]
    fn test_set_enforces_capacity() {
        let mut set = ConnectionSet::new(2);

        let (a, _a_remote) = seqpacket_pair();
        let (b, _b_remote) = seqpacket_pair();
        let (c, _c_remote) = seqpacket_pair();

        let k1 = set.insert(Connection::new(a, 64)).unwrap();
        let k2 = set.insert(Connection::new(b, 64)).unwrap();
        assert!(set.insert(Connection::new(c, 64)).is_none());

        assert_eq!(set.len(), 2);
        assert!(set.remove(k1).is_some());
        assert!(set.remove(k1).is_none());
        assert_eq!(set.len(), 1);
        assert!(set.get_mut(k2).is_some());
    }

    #[test]
    fn test_remove_absent_key_is_none() {
        let mut set = ConnectionSet::new(4);
        assert!(set.remove(7).is_none());
        assert_eq!(set.len(), 0);
        assert_eq!(set.capacity(), 4);
    }
}
