//! Append-only audit log
//!
//! Every state transition and every command sent to, or response received
//! from, the firmware is recorded as a timestamped entry. The core only
//! writes entries; sinks decide where they go.

use crate::state::MachineState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// What an audit entry records
#[derive(Debug, Clone, PartialEq)]
pub enum AuditKind {
    /// The machine moved between states
    Transition {
        /// Previous state.
        from: MachineState,
        /// New state.
        to: MachineState,
    },
    /// A request was ignored because it is not valid in the current state
    Ignored {
        /// The operation that was requested.
        request: String,
        /// The state it was requested in.
        state: MachineState,
    },
    /// Command text written to the transport
    Sent(String),
    /// Trimmed response line read from the transport
    Received(String),
    /// A failure worth keeping
    Error(String),
    /// Free-form note (job milestones)
    Note(String),
}

/// A single timestamped audit record
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: AuditKind,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn now(kind: AuditKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        match &self.kind {
            AuditKind::Transition { from, to } => write!(f, "{ts} STATE {from} -> {to}"),
            AuditKind::Ignored { request, state } => {
                write!(f, "{ts} IGNORED {request} while {state}")
            }
            AuditKind::Sent(cmd) => write!(f, "{ts} SEND {cmd}"),
            AuditKind::Received(line) => write!(f, "{ts} RECV {line}"),
            AuditKind::Error(msg) => write!(f, "{ts} ERROR {msg}"),
            AuditKind::Note(msg) => write!(f, "{ts} NOTE {msg}"),
        }
    }
}

/// Destination for audit entries
pub trait AuditSink: Send + Sync {
    /// Record one entry; sinks must not fail the caller
    fn record(&self, entry: AuditEntry);
}

/// Sink that forwards entries to `tracing`
///
/// Audited events are logged here and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, entry: AuditEntry) {
        match &entry.kind {
            AuditKind::Error(msg) => tracing::error!(target: "cncstream::audit", "{}", msg),
            AuditKind::Ignored { request, state } => {
                tracing::warn!(target: "cncstream::audit", "ignored {} while {}", request, state)
            }
            AuditKind::Transition { from, to } => {
                tracing::info!(target: "cncstream::audit", "{} -> {}", from, to)
            }
            AuditKind::Note(msg) => tracing::info!(target: "cncstream::audit", "{}", msg),
            AuditKind::Sent(cmd) => tracing::debug!(target: "cncstream::audit", "> {}", cmd),
            AuditKind::Received(line) => {
                tracing::debug!(target: "cncstream::audit", "< {}", line)
            }
        }
    }
}

/// Sink that appends one line per entry to a file
pub struct FileAudit {
    file: Mutex<File>,
}

impl FileAudit {
    /// Open (or create) the log file in append mode
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAudit {
    fn record(&self, entry: AuditEntry) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", entry) {
            tracing::warn!("Failed to write audit entry: {}", e);
        }
    }
}

/// Bounded in-memory sink; oldest entries are dropped first
pub struct MemoryAudit {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl MemoryAudit {
    /// Create a sink holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the recorded entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Snapshot of the recorded entry kinds, oldest first
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.entries.lock().iter().map(|e| e.kind.clone()).collect()
    }

    /// Every `(from, to)` transition pair recorded so far
    pub fn transitions(&self) -> Vec<(MachineState, MachineState)> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e.kind {
                AuditKind::Transition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    /// Every command text written to the transport
    pub fn sent(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                AuditKind::Sent(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop all recorded entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryAudit {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// Sink that copies every entry to several sinks
#[derive(Default)]
pub struct FanoutAudit {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAudit {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAudit {
    fn record(&self, entry: AuditEntry) {
        for sink in &self.sinks {
            sink.record(entry.clone());
        }
    }
}
