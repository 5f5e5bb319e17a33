//! GRBL Response Classification
//!
//! Classifies lines received from the controller into acknowledgements,
//! errors, alarms, probe reports and status reports, and extracts positions
//! from probe and status reports.

use cncstream_core::ChannelError;
use serde::{Deserialize, Serialize};

/// Class of a single response line
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseClass {
    /// Line acknowledged (`ok`)
    Ok,
    /// Line rejected (`error:N`)
    Error(Option<u8>),
    /// Alarm raised (`ALARM:N`)
    Alarm(Option<u8>),
    /// Probe report; `None` when the report is malformed
    ProbeReport(Option<ProbeReport>),
    /// Real-time status report (`<...>`)
    Status(StatusReport),
    /// Anything else (welcome banner, `[MSG:...]`, settings)
    Message,
}

impl ResponseClass {
    /// Whether this line ends the wait for an ordinary command
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_) | Self::Alarm(_))
    }
}

/// Machine position, X/Y/Z only
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
}

/// Parsed `PRB` report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Position where the probe triggered
    pub position: Position,
    /// Whether the probe actually made contact (`:1`), when reported
    pub contact: Option<bool>,
}

/// Parsed `<...>` status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Controller state (`Idle`, `Run`, `Hold:0`, ...)
    pub state: String,
    /// Machine position
    pub machine_pos: Option<Position>,
    /// Work position
    pub work_pos: Option<Position>,
}

/// Classify a response line
///
/// `ok` is matched case-insensitively; `error` is a case-insensitive
/// prefix; `ALARM` matches anywhere in the line but only in upper case, so
/// an `<Alarm|...>` status report is not mistaken for an alarm.
pub fn classify(line: &str) -> ResponseClass {
    let line = line.trim();

    if line.eq_ignore_ascii_case("ok") {
        return ResponseClass::Ok;
    }

    if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("error")) {
        return ResponseClass::Error(trailing_code(line));
    }

    if let Some(idx) = line.find("ALARM") {
        return ResponseClass::Alarm(trailing_code(&line[idx..]));
    }

    if line.contains("PRB") {
        return ResponseClass::ProbeReport(parse_probe_report(line));
    }

    if line.starts_with('<') && line.ends_with('>') {
        if let Some(status) = parse_status_report(line) {
            return ResponseClass::Status(status);
        }
    }

    ResponseClass::Message
}

fn trailing_code(line: &str) -> Option<u8> {
    let (_, rest) = line.split_once(':')?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u8>().ok()
}

/// Parse a probe report such as `[PRB:0.000,0.000,-45.010:1]` or `PRB:0,0,-45.23`
pub fn parse_probe_report(line: &str) -> Option<ProbeReport> {
    let start = line.find("PRB:")? + "PRB:".len();
    let body = line[start..].trim_end().trim_end_matches(']');

    let mut fields = body.split(':');
    let position = parse_position(fields.next()?)?;
    let contact = fields.next().and_then(|flag| match flag.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    });

    Some(ProbeReport { position, contact })
}

/// Z coordinate of a probe report, if the line is one
pub fn parse_probe_z(line: &str) -> Option<f64> {
    parse_probe_report(line).map(|report| report.position.z)
}

/// Parse a status report such as `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`
pub fn parse_status_report(line: &str) -> Option<StatusReport> {
    let inner = line.trim().strip_prefix('<')?.strip_suffix('>')?;
    let mut parts = inner.split('|');

    let state = parts.next()?.trim().to_string();
    if state.is_empty() {
        return None;
    }

    let mut machine_pos = None;
    let mut work_pos = None;

    for part in parts {
        let part = part.trim();
        if let Some(pos) = part.strip_prefix("MPos:") {
            machine_pos = parse_position(pos);
        } else if let Some(pos) = part.strip_prefix("WPos:") {
            work_pos = parse_position(pos);
        }
    }

    Some(StatusReport {
        state,
        machine_pos,
        work_pos,
    })
}

fn parse_position(coords: &str) -> Option<Position> {
    let values = coords
        .split(',')
        .map(|s| s.trim().parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;

    if values.len() < 3 {
        return None;
    }

    Some(Position {
        x: values[0],
        y: values[1],
        z: values[2],
    })
}

/// Get error description
pub fn error_description(code: u8) -> &'static str {
    match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid statement",
        4 => "Negative value",
        5 => "Setting disabled",
        9 => "G-code locked out during alarm or jog state",
        15 => "Travel exceeded",
        20 => "Unsupported or invalid g-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Failed to execute startup block",
        24 => "EEPROM read failed",
        _ => "Unknown error",
    }
}

/// Get alarm description
pub fn alarm_description(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered",
        2 => "Soft limit exceeded",
        3 => "Abort during cycle",
        4 => "Probe fail",
        5 => "Probe not triggered",
        6 => "Homing fail",
        7 => "Homing fail pulloff",
        8 => "Spindle control failure",
        9 => "Cooling mist control failure",
        _ => "Unknown alarm",
    }
}

/// Meaning of the firmware code carried by an `error` or `ALARM` failure
pub fn describe_failure(error: &ChannelError) -> Option<&'static str> {
    match error {
        ChannelError::Firmware {
            code: Some(code), ..
        } => Some(error_description(*code)),
        ChannelError::Alarm {
            code: Some(code), ..
        } => Some(alarm_description(*code)),
        _ => None,
    }
}
