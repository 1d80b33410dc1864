//! Outbound logging seam.
//!
//! The relay hands every decoded frame to a `LogSink` and forgets about it.
//! Sinks are synchronous; a sink that blocks stalls the whole relay, so
//! implementations must return promptly. Sink failures are the sink's own
//! concern and never reach the loop.

use tracing::{debug, error, info, warn};

/// Consumer of decoded (severity, text) pairs.
pub trait LogSink: Send {
    fn emit(&mut self, severity: u32, text: &[u8]);
}

/// Production sink: forwards frames into the tracing pipeline at a level
/// derived from the syslog-style severity code.
///
/// Severity codes are not validated upstream, so anything can arrive here;
/// unrecognized codes are reported at info with the raw code attached
/// rather than dropped.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&mut self, severity: u32, text: &[u8]) {
        let message = String::from_utf8_lossy(text);
        match severity {
            0..=3 => error!(severity, %message, "client event"),
            4 => warn!(severity, %message, "client event"),
            5 | 6 => info!(severity, %message, "client event"),
            7 => debug!(severity, %message, "client event"),
            _ => info!(severity, %message, "client event with unknown severity"),
        }
    }
}
