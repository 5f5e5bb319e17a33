//! Error handling for cncstream
//!
//! Provides error types for every layer of the streaming core:
//! - Channel errors (transport I/O and firmware responses)
//! - Probe errors (tool-length measurement)
//! - Job errors (program file access)
//! - Control errors (operator requests that cannot be honoured)
//! - Invalid state transitions
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::state::MachineState;
use std::path::PathBuf;
use thiserror::Error;

/// Command channel error type
///
/// Represents failures while writing a command to the transport or while
/// waiting for the firmware's terminal response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// The transport failed to write, read, or was closed
    #[error("Transport I/O error: {reason}")]
    Io {
        /// The reason for the I/O failure.
        reason: String,
    },

    /// No terminal response arrived within the configured timeout
    #[error("No response to '{command}' after {timeout_ms}ms")]
    Timeout {
        /// The command that was waiting.
        command: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// No probe report arrived within the probe window
    #[error("No probe report after {timeout_ms}ms")]
    NoProbeReport {
        /// The probe window in milliseconds.
        timeout_ms: u64,
    },

    /// Firmware answered with an `error` line
    #[error("Firmware rejected '{command}': {line}")]
    Firmware {
        /// The command that was rejected.
        command: String,
        /// The numeric error code, when one could be parsed.
        code: Option<u8>,
        /// The raw response line.
        line: String,
    },

    /// Firmware raised an alarm
    #[error("Firmware alarm after '{command}': {line}")]
    Alarm {
        /// The command in flight when the alarm arrived.
        command: String,
        /// The numeric alarm code, when one could be parsed.
        code: Option<u8>,
        /// The raw response line.
        line: String,
    },

    /// The wait was abandoned because the operation was cancelled
    #[error("Cancelled while waiting for a response to '{command}'")]
    Cancelled {
        /// The command whose response was abandoned.
        command: String,
    },
}

impl ChannelError {
    /// Build an I/O error from anything displayable
    pub fn io(reason: impl std::fmt::Display) -> Self {
        Self::Io {
            reason: reason.to_string(),
        }
    }

    /// Whether the firmware merely rejected the line and streaming may continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Firmware { .. })
    }

    /// Check if this is a timeout of either kind
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoProbeReport { .. })
    }
}

/// Which half of the tool-change sequence a probe error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// Measuring the reference tool
    ReferenceTool,
    /// Measuring the replacement tool
    NewTool,
}

impl std::fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReferenceTool => write!(f, "reference tool"),
            Self::NewTool => write!(f, "new tool"),
        }
    }
}

/// Tool-length probing error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// A probe move finished without a parseable `PRB` report
    #[error("No probe reading for the {phase}")]
    NoReading {
        /// The phase that failed.
        phase: ProbePhase,
    },

    /// The machine left the probing state (stop) while probing
    #[error("Probing the {phase} was interrupted; machine is {state}")]
    Interrupted {
        /// The phase that was interrupted.
        phase: ProbePhase,
        /// The state the machine was found in.
        state: MachineState,
    },

    /// The no-reference case: new tool probed without a stored reference
    #[error("No reference tool measurement is stored")]
    MissingReference,

    /// A command in the sequence failed
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Job runner error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// The program file does not exist
    #[error("Program file not found: {}", path.display())]
    FileNotFound {
        /// The path that was requested.
        path: PathBuf,
    },

    /// The program file could not be read
    #[error("Failed to read {}: {reason}", path.display())]
    FileRead {
        /// The path being read.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// A command failed fatally while streaming
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Illegal state-change request
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    /// The state the machine was in.
    pub from: MachineState,
    /// The state that was requested.
    pub to: MachineState,
}

/// Operator request error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// Another job or probe routine is still running
    #[error("A {active} worker is already active")]
    Busy {
        /// The kind of worker that is active.
        active: String,
    },

    /// The request is not valid in the current state
    #[error("Cannot {verb} while {state}")]
    NotAllowed {
        /// The requested operation.
        verb: String,
        /// The state the machine was in.
        state: MachineState,
    },

    /// The worker thread could not be started
    #[error("Failed to start worker: {reason}")]
    Spawn {
        /// The reason the spawn failed.
        reason: String,
    },
}
