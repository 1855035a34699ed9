//! Ready-signal detection in registry process output.
//!
//! The registry exposes no structured readiness event; it prints a URL such
//! as `http://localhost:4873/` once it accepts connections. Chunks read from
//! the pipe are not line-aligned, so the marker may appear anywhere in them.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static READY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"localhost:(?<port>\d+)").expect("ready pattern is a valid regex")
});

/// Port marker located in a text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMatch {
    /// Parsed port number.
    pub port: u16,
    /// The digits run up to the end of the buffer, so more may follow in the
    /// next chunk.
    pub at_end: bool,
}

/// Locate the first usable `localhost:<digits>` marker in `text`.
///
/// Captures that do not form a TCP port (zero, or larger than `u16::MAX`)
/// are skipped.
#[must_use]
pub fn locate_port(text: &str) -> Option<PortMatch> {
    READY_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.name("port"))
        .find_map(|m| {
            let port = m.as_str().parse::<u16>().ok().filter(|port| *port != 0)?;
            Some(PortMatch {
                port,
                at_end: m.end() == text.len(),
            })
        })
}

/// Extract the announced port from a chunk of registry output.
///
/// Returns `None` when the chunk holds no `localhost:<digits>` marker or when
/// the digits do not form a usable TCP port. Invalid UTF-8 is decoded
/// lossily; this function never fails.
#[must_use]
pub fn discover_port(chunk: &[u8]) -> Option<u16> {
    locate_port(&String::from_utf8_lossy(chunk)).map(|found| found.port)
}

/// Registry URL for a discovered port.
#[must_use]
pub fn registry_url(port: u16) -> String {
    format!("http://localhost:{port}")
}
