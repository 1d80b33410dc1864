//! Framed message codec.
//!
//! A frame is a 4-byte severity code followed by the message text, with no
//! terminator. The transport preserves message boundaries, so the byte count
//! delivered by a completed read is authoritative for the text length —
//! there is no length field and no delimiter scanning.

use bytes::{BufMut, Bytes, BytesMut};

/// Width of the leading severity field in bytes.
pub const SEVERITY_WIDTH: usize = 4;

/// A decoded frame, borrowing the text from the receive buffer.
///
/// The severity code is carried verbatim; codes outside the usual syslog
/// range are passed through to the sink untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub severity: u32,
    pub text: &'a [u8],
}

/// Frame decoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes received than the severity field is wide.
    Truncated,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Truncated => {
                write!(f, "frame shorter than {SEVERITY_WIDTH}-byte severity field")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one received frame.
///
/// `raw` must be exactly the bytes delivered by one read completion, not the
/// full buffer capacity. The relay and its clients always share a host, so
/// the severity is native-endian.
pub fn decode(raw: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if raw.len() < SEVERITY_WIDTH {
        return Err(DecodeError::Truncated);
    }

    let (head, text) = raw.split_at(SEVERITY_WIDTH);
    let severity = u32::from_ne_bytes(head.try_into().expect("split at severity width"));

    Ok(Frame { severity, text })
}

/// Encode a frame for transmission.
pub fn encode(severity: u32, text: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEVERITY_WIDTH + text.len());
    buf.put_u32_ne(severity);
    buf.put_slice(text);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let wire = encode(3, b"disk low");
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.severity, 3);
        assert_eq!(frame.text, b"disk low");
    }

    #[test]
    fn test_empty_text() {
        let wire = encode(6, b"");
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.severity, 6);
        assert!(frame.text.is_empty());
    }

    #[test]
    fn test_truncated() {
        for len in 0..SEVERITY_WIDTH {
            let short = vec![0u8; len];
            assert_eq!(decode(&short), Err(DecodeError::Truncated));
        }
    }

    #[test]
    fn test_unknown_severity_passes_through() {
        // No validation against a known-severity set.
        let wire = encode(0xDEAD_BEEF, b"odd but legal");
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.severity, 0xDEAD_BEEF);
    }

    #[test]
    fn test_length_is_received_bytes_not_capacity() {
        // A frame read into a larger buffer must only cover the bytes
        // actually received.
        let mut buf = vec![0u8; 128];
        let wire = encode(4, b"short");
        buf[..wire.len()].copy_from_slice(&wire);

        let frame = decode(&buf[..wire.len()]).unwrap();
        assert_eq!(frame.text, b"short");
    }
}
