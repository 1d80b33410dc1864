//! The connection-multiplexing IPC relay.
//!
//! One thread owns everything: the listening endpoint, the set of live
//! connections, and the wait/dispatch loop. Clients connect, send one frame,
//! and are gone. The only thing another thread may touch is the stop handle.

mod connection;
mod event_loop;
pub mod frame;
mod listener;

pub mod client;

pub use event_loop::ExitReason;

use crate::sink::LogSink;
use connection::ConnectionSet;
use listener::Listener;
use mio::{Poll, Waker};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Relay construction parameters, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Filesystem path of the listening socket.
    pub socket: PathBuf,
    /// Upper bound on concurrent live connections.
    pub max_connections: usize,
    /// Receive buffer capacity; frames beyond it are truncated by the
    /// transport.
    pub max_frame_size: usize,
}

/// The relay context: every piece of mutable state, owned in one place and
/// threaded by reference through the loop.
pub struct Relay {
    poll: Poll,
    listener: Listener,
    connections: ConnectionSet,
    sink: Box<dyn LogSink>,
    max_frame_size: usize,
    stop_flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

/// Cross-thread stop request for a running relay.
///
/// Setting it is the whole job of the external lifecycle shim: the flag is
/// latched (never cleared) and the waker guarantees the loop observes it
/// even if the request lands while the loop is blocked — or before it
/// starts.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    /// Request a graceful shutdown. Idempotent.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // A failed wake leaves the flag set; the next readiness of any
        // member still ends the loop.
        let _ = self.waker.wake();
    }
}

impl Relay {
    /// Bind the endpoint and arm the wait set.
    ///
    /// Returns once the listener is accepting, so a client connecting right
    /// after this call is never refused. Errors here are unrecoverable for
    /// the relay; the caller logs them and exits non-zero.
    pub fn start(opts: RelayOptions, sink: Box<dyn LogSink>) -> io::Result<Relay> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), event_loop::STOP_TOKEN)?);

        let listener = Listener::bind(&opts.socket)?;
        listener.register(poll.registry(), event_loop::LISTENER_TOKEN)?;

        info!(
            socket = %listener.path().display(),
            max_connections = opts.max_connections,
            max_frame_size = opts.max_frame_size,
            "relay listening"
        );

        Ok(Relay {
            poll,
            listener,
            connections: ConnectionSet::new(opts.max_connections),
            sink,
            max_frame_size: opts.max_frame_size,
            stop_flag: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Handle for requesting shutdown from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Number of currently live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogSink;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Sink that forwards every emit to the test thread.
    struct ChannelSink(mpsc::Sender<(u32, Vec<u8>)>);

    impl LogSink for ChannelSink {
        fn emit(&mut self, severity: u32, text: &[u8]) {
            let _ = self.0.send((severity, text.to_vec()));
        }
    }

    fn start_relay(
        socket: PathBuf,
    ) -> (Relay, mpsc::Receiver<(u32, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel();
        let relay = Relay::start(
            RelayOptions {
                socket,
                max_connections: 16,
                max_frame_size: 1024,
            },
            Box::new(ChannelSink(tx)),
        )
        .unwrap();
        (relay, rx)
    }

    /// Run the relay on its own thread, returning it with the exit reason.
    fn spawn_loop(mut relay: Relay) -> thread::JoinHandle<(Relay, ExitReason)> {
        thread::spawn(move || {
            let reason = relay.run();
            (relay, reason)
        })
    }

    #[test]
    fn test_relays_frames_from_concurrent_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let (relay, rx) = start_relay(path.clone());
        let stop = relay.stop_handle();

        let loop_thread = spawn_loop(relay);

        let expected: &[(u32, &[u8])] = &[
            (3, b"disk low"),
            (6, b"battery ok"),
            (3, b"ups offline"),
        ];
        let senders: Vec<_> = expected
            .iter()
            .map(|&(severity, text)| {
                let path = path.clone();
                thread::spawn(move || client::send_frame(&path, severity, text).unwrap())
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        // Delivery order across connections is unspecified.
        let mut got: Vec<(u32, Vec<u8>)> = (0..expected.len())
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        let mut want: Vec<(u32, Vec<u8>)> = expected
            .iter()
            .map(|&(s, t)| (s, t.to_vec()))
            .collect();
        want.sort();
        assert_eq!(got, want);

        stop.request_stop();
        let (relay, reason) = loop_thread.join().unwrap();
        assert!(matches!(reason, ExitReason::StopRequested));
        assert_eq!(relay.connection_count(), 0);
    }

    #[test]
    fn test_short_frame_reaches_no_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let (relay, rx) = start_relay(path.clone());
        let stop = relay.stop_handle();

        let loop_thread = spawn_loop(relay);

        // Two bytes: shorter than the severity field. No sink call, no loop
        // damage.
        client::send_raw(&path, b"\x03\x00").unwrap();

        // The loop is still alive: a valid frame still gets through.
        client::send_frame(&path, 6, b"still here").unwrap();

        let (severity, text) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((severity, text.as_slice()), (6, &b"still here"[..]));
        assert!(rx.try_recv().is_err());

        stop.request_stop();
        let (relay, reason) = loop_thread.join().unwrap();
        assert!(matches!(reason, ExitReason::StopRequested));
        assert_eq!(relay.connection_count(), 0);
    }

    #[test]
    fn test_stop_abandons_in_flight_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let (relay, rx) = start_relay(path.clone());
        let stop = relay.stop_handle();

        let loop_thread = spawn_loop(relay);

        // Two clients connect but never send; their reads stay pending.
        let idle_a = client::connect(&path).unwrap();
        let idle_b = client::connect(&path).unwrap();
        thread::sleep(Duration::from_millis(100));

        stop.request_stop();
        let (_relay, reason) = loop_thread.join().unwrap();
        assert!(matches!(reason, ExitReason::StopRequested));

        // Nothing was dispatched for the abandoned connections.
        assert!(rx.try_recv().is_err());
        drop(idle_a);
        drop(idle_b);
    }

    #[test]
    fn test_stop_requested_before_run_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let (mut relay, _rx) = start_relay(path);

        relay.stop_handle().request_stop();
        assert!(matches!(relay.run(), ExitReason::StopRequested));
    }
}
