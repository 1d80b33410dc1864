//! The wait/dispatch loop.
//!
//! One blocking point: `Poll::poll` with no timeout. The wait set is the
//! poll registration set — every live connection, the listener, and the
//! stop waker. Absence of traffic costs nothing; readiness dispatches to
//! exactly the right handler.

use super::connection::{Connection, ReadOutcome};
use super::frame;
use super::Relay;
use mio::{Events, Token};
use std::io;
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

/// Stop signal's reserved token.
pub(super) const STOP_TOKEN: Token = Token(usize::MAX);
/// Listener's reserved token. Connection keys grow from zero and can never
/// collide with the reserved range.
pub(super) const LISTENER_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 128;

/// Why the loop returned.
#[derive(Debug)]
pub enum ExitReason {
    /// The stop signal fired; the graceful path. In-flight connections and
    /// the pending accept are abandoned, not drained.
    StopRequested,
    /// The wait primitive itself failed. Fatal; the loop does not retry.
    WaitFailed(io::Error),
}

impl Relay {
    /// Run until the stop signal fires or the wait primitive fails.
    pub fn run(&mut self) -> ExitReason {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                // A signal landing on this thread interrupts the wait
                // without anything being ready; that is not a wait failure.
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "event wait failed");
                return ExitReason::WaitFailed(e);
            }

            // The stop flag wins over anything else that became ready in
            // the same wake-up, including a wake that happened before the
            // loop first blocked.
            if self.stop_flag.load(Ordering::SeqCst) {
                debug!(
                    abandoned = self.connections.len(),
                    "stop requested, leaving the loop"
                );
                return ExitReason::StopRequested;
            }

            for event in events.iter() {
                match event.token() {
                    STOP_TOKEN => {
                        // Wake already handled by the flag check above.
                    }
                    LISTENER_TOKEN => self.accept_ready_clients(),
                    Token(key) => self.service_connection(key),
                }
            }
        }
    }

    /// Drain the accept queue, admitting each waiting client.
    ///
    /// The listener stays armed throughout; the kernel backlog covers
    /// clients arriving while we work. Accept errors cost at most the one
    /// client that produced them.
    fn accept_ready_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some(socket)) => self.admit(Connection::new(socket, self.max_frame_size)),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Insert a freshly accepted connection and arm its read.
    fn admit(&mut self, conn: Connection) {
        let Some(key) = self.connections.insert(conn) else {
            warn!(
                limit = self.connections.capacity(),
                "connection limit reached, dropping client"
            );
            return;
        };

        let conn = self
            .connections
            .get_mut(key)
            .expect("connection just inserted");
        if let Err(e) = conn.register(self.poll.registry(), Token(key)) {
            warn!(conn = key, error = %e, "failed to watch new connection");
            self.connections.remove(key);
            return;
        }

        debug!(conn = key, live = self.connections.len(), "accepted connection");
    }

    /// Service one connection's read readiness: decode and dispatch its
    /// single message, then retire it.
    ///
    /// Every failure here is absorbed at the connection boundary — the
    /// connection is discarded and the loop moves on.
    fn service_connection(&mut self, key: usize) {
        // A batch may carry readiness for a connection retired earlier in
        // the same batch.
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        match conn.read_frame() {
            Ok(ReadOutcome::Pending) => {}
            Ok(ReadOutcome::Complete(len)) => {
                match frame::decode(conn.received(len)) {
                    Ok(msg) => self.sink.emit(msg.severity, msg.text),
                    Err(e) => debug!(conn = key, error = %e, "discarding bad frame"),
                }
                self.close_connection(key);
            }
            Ok(ReadOutcome::Closed) => {
                debug!(conn = key, "client left before sending a frame");
                self.close_connection(key);
            }
            Err(e) => {
                debug!(conn = key, error = %e, "read failed");
                self.close_connection(key);
            }
        }
    }

    /// Remove a connection from the wait set and destroy it.
    fn close_connection(&mut self, key: usize) {
        if let Some(conn) = self.connections.remove(key) {
            if let Err(e) = conn.deregister(self.poll.registry()) {
                debug!(conn = key, error = %e, "deregister failed");
            }
            debug!(conn = key, live = self.connections.len(), "connection closed");
        }
    }
}
