//! Commands sent to the controller
//!
//! A command is either a text block (newline-terminated on the wire) or a
//! single real-time byte, plus the response the channel should wait for.

use std::fmt;

/// Feed hold
pub const FEED_HOLD: u8 = b'!';
/// Cycle start / resume
pub const CYCLE_START: u8 = b'~';
/// Soft reset (ctrl-x)
pub const SOFT_RESET: u8 = 0x18;
/// Real-time status query
pub const STATUS_QUERY: u8 = b'?';

/// What the channel waits for after writing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return as soon as the bytes are flushed
    NoWait,
    /// Wait for `ok`, `error...` or `ALARM`
    WaitForOkOrError,
    /// Wait for a line containing `PRB`
    WaitForProbeReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Payload {
    Line(String),
    Realtime(u8),
}

/// A single command and its wait policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    payload: Payload,
    policy: WaitPolicy,
}

impl Command {
    /// A G-code block that waits for `ok`/`error`
    pub fn gcode(text: impl Into<String>) -> Self {
        Self::line(text, WaitPolicy::WaitForOkOrError)
    }

    /// A G-code block with an explicit wait policy
    pub fn line(text: impl Into<String>, policy: WaitPolicy) -> Self {
        Self {
            payload: Payload::Line(text.into().trim().to_string()),
            policy,
        }
    }

    /// A real-time byte; never waits
    pub fn realtime(byte: u8) -> Self {
        Self {
            payload: Payload::Realtime(byte),
            policy: WaitPolicy::NoWait,
        }
    }

    /// Feed hold (`!`)
    pub fn feed_hold() -> Self {
        Self::realtime(FEED_HOLD)
    }

    /// Cycle start (`~`)
    pub fn cycle_start() -> Self {
        Self::realtime(CYCLE_START)
    }

    /// Soft reset (`0x18`)
    pub fn soft_reset() -> Self {
        Self::realtime(SOFT_RESET)
    }

    /// Status query (`?`)
    pub fn status_query() -> Self {
        Self::realtime(STATUS_QUERY)
    }

    /// Homing cycle (`$H`)
    pub fn home() -> Self {
        Self::gcode("$H")
    }

    /// Spindle stop (`M5`)
    pub fn spindle_stop() -> Self {
        Self::gcode("M5")
    }

    /// Absolute positioning (`G90`)
    pub fn absolute() -> Self {
        Self::gcode("G90")
    }

    /// Relative positioning (`G91`)
    pub fn relative() -> Self {
        Self::gcode("G91")
    }

    /// Rapid move in X and Y
    pub fn rapid_xy(x: f64, y: f64) -> Self {
        Self::gcode(format!("G0 X{} Y{}", fmt_coord(x), fmt_coord(y)))
    }

    /// Rapid move in X, Y and Z
    pub fn rapid_xyz(x: f64, y: f64, z: f64) -> Self {
        Self::gcode(format!(
            "G0 X{} Y{} Z{}",
            fmt_coord(x),
            fmt_coord(y),
            fmt_coord(z)
        ))
    }

    /// Rapid move in Z
    pub fn rapid_z(z: f64) -> Self {
        Self::gcode(format!("G0 Z{}", fmt_coord(z)))
    }

    /// Straight probe toward the workpiece (`G38.2`), waits for the report
    pub fn probe_z(depth: f64, feed: f64) -> Self {
        Self::line(
            format!("G38.2 Z{} F{}", fmt_coord(depth), fmt_coord(feed)),
            WaitPolicy::WaitForProbeReport,
        )
    }

    /// Tool-length offset (`G43 Z<offset>`), four decimals
    pub fn tool_length_offset(offset: f64) -> Self {
        Self::gcode(format!("G43 Z{:.4}", offset))
    }

    /// Wait policy
    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Bytes as written to the transport
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Line(text) => {
                let mut bytes = Vec::with_capacity(text.len() + 1);
                bytes.extend_from_slice(text.as_bytes());
                bytes.push(b'\n');
                bytes
            }
            Payload::Realtime(byte) => vec![*byte],
        }
    }

    /// Literal text for logs
    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Line(text) => write!(f, "{}", text),
            Payload::Realtime(byte) if byte.is_ascii_graphic() => write!(f, "{}", *byte as char),
            Payload::Realtime(byte) => write!(f, "0x{:02X}", byte),
        }
    }
}

/// Format a coordinate without trailing zeros (`-50`, `-21.55`)
fn fmt_coord(value: f64) -> String {
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
