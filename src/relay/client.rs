//! One-shot relay client.
//!
//! The client side of the relay contract is deliberately tiny: connect,
//! send one frame, disconnect. The relay never writes back.

use super::frame;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::path::Path;

/// Connect to a relay socket.
pub fn connect(path: &Path) -> io::Result<Socket> {
    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    socket.connect(&SockAddr::unix(path)?)?;
    Ok(socket)
}

/// Send one framed message to the relay at `path`.
pub fn send_frame(path: &Path, severity: u32, text: &[u8]) -> io::Result<()> {
    send_raw(path, &frame::encode(severity, text))
}

/// Send pre-encoded bytes as a single message. Used by tests to exercise
/// the relay's handling of malformed frames.
pub fn send_raw(path: &Path, payload: &[u8]) -> io::Result<()> {
    let socket = connect(path)?;
    let sent = socket.send(payload)?;
    if sent != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "frame sent partially",
        ));
    }
    Ok(())
}
