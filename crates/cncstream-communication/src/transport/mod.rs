//! Byte transports
//!
//! The channel talks to the controller through the `Transport` trait: a
//! duplex byte link with line-oriented reads, explicit flush, and input and
//! output buffer resets. A real serial port and a no-op dummy are provided.

pub mod dummy;
pub mod serial;

use std::io;
use std::time::Duration;

pub use dummy::DummyTransport;
pub use serial::{first_available_port, list_ports, SerialPortInfo, SerialTransport};

/// Duplex byte link to the controller
pub trait Transport: Send {
    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push written bytes out to the device
    fn flush(&mut self) -> io::Result<()>;

    /// Read one newline-terminated line, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no complete line arrived in time. The line
    /// terminator is stripped. A closed link is reported as
    /// `io::ErrorKind::UnexpectedEof`.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Discard received but unread bytes
    fn reset_input_buffer(&mut self) -> io::Result<()>;

    /// Discard written but unsent bytes
    fn reset_output_buffer(&mut self) -> io::Result<()>;

    /// Whether this is a stand-in with no device behind it
    fn is_dummy(&self) -> bool {
        false
    }

    /// Human readable name (port path)
    fn name(&self) -> String;
}

/// Reassembles lines from the chunks a serial read returns
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take the next complete line, without its `\n` or `\r\n`
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
