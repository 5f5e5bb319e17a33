//! Command channel
//!
//! Serializes one command at a time onto the transport and blocks until the
//! firmware's terminal response arrives, a timeout elapses, or the caller's
//! cancel token fires. There is never more than one command in flight: the
//! controller's receive buffer is small and sending ahead risks interleaved
//! motion.
//!
//! The transport sits behind a single mutex. A write holds the lock for the
//! whole write+flush; the response wait re-acquires it for each bounded
//! poll, so the operator thread can slip real-time bytes in between polls
//! but never into the middle of a line.

use crate::grbl::{classify, parse_status_report, Command, ResponseClass, StatusReport, WaitPolicy};
use crate::transport::Transport;
use cncstream_core::{AuditEntry, AuditKind, AuditSink, CancelToken, ChannelError};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Channel timing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Upper bound for a single transport read
    pub poll_interval: Duration,
    /// Limit for `ok`/`error` waits; `None` waits forever
    pub response_timeout: Option<Duration>,
    /// Limit for probe report waits
    pub probe_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            response_timeout: None,
            probe_timeout: Duration::from_secs(90),
        }
    }
}

/// Lines received for one command, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLines {
    lines: Vec<String>,
}

impl ResponseLines {
    /// All lines, terminal line included
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether nothing was received (`NoWait`)
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The line that ended the wait
    pub fn terminal(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Z from the last parseable probe report among the lines
    pub fn probe_z(&self) -> Option<f64> {
        self.lines
            .iter()
            .rev()
            .find_map(|line| crate::grbl::parse_probe_z(line))
    }
}

/// The single point through which all firmware traffic flows
pub struct CommandChannel {
    transport: Mutex<Box<dyn Transport>>,
    config: ChannelConfig,
    audit: Arc<dyn AuditSink>,
}

impl CommandChannel {
    /// Create a channel over `transport`
    pub fn new(
        transport: Box<dyn Transport>,
        config: ChannelConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            transport: Mutex::new(transport),
            config,
            audit,
        }
    }

    /// Timing configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Whether the transport is the dummy stand-in
    pub fn is_dummy(&self) -> bool {
        self.transport.lock().is_dummy()
    }

    /// Transport name
    pub fn name(&self) -> String {
        self.transport.lock().name()
    }

    /// Send a command and wait according to its policy
    pub fn send(&self, command: &Command, cancel: &CancelToken) -> Result<ResponseLines, ChannelError> {
        self.send_gated(command, cancel, || true)
            .map(Option::unwrap_or_default)
    }

    /// Send only if `gate` holds at the moment of writing
    ///
    /// `gate` runs under the transport lock, so a state change made by a
    /// holder of [`CommandChannel::exclusive`] either happens entirely
    /// before the check or entirely after the write. Returns `Ok(None)`
    /// without writing when the gate is closed.
    pub fn send_gated(
        &self,
        command: &Command,
        cancel: &CancelToken,
        gate: impl FnOnce() -> bool,
    ) -> Result<Option<ResponseLines>, ChannelError> {
        {
            let mut transport = self.transport.lock();
            if !gate() {
                tracing::debug!("Gate closed, not sending {}", command);
                return Ok(None);
            }
            write_command(transport.as_mut(), self.audit.as_ref(), command)?;
        }

        match command.policy() {
            WaitPolicy::NoWait => Ok(Some(ResponseLines::default())),
            policy => self.await_response(command, policy, cancel).map(Some),
        }
    }

    /// Hold the transport for a multi-command sequence that does not wait
    pub fn exclusive(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            transport: self.transport.lock(),
            audit: self.audit.as_ref(),
        }
    }

    /// Discard pending input and output
    pub fn reset_buffers(&self) -> Result<(), ChannelError> {
        self.exclusive().reset_buffers()
    }

    /// Wake the controller: blank lines, settle, then discard the banner
    pub fn wake(&self, delay: Duration) -> Result<(), ChannelError> {
        {
            let mut transport = self.transport.lock();
            transport.write_all(b"\r\n\r\n").map_err(ChannelError::io)?;
            transport.flush().map_err(ChannelError::io)?;
        }
        self.audit
            .record(AuditEntry::now(AuditKind::Note("wake controller".to_string())));
        tracing::info!("Waking controller on {}", self.name());
        thread::sleep(delay);
        self.transport
            .lock()
            .reset_input_buffer()
            .map_err(ChannelError::io)
    }

    /// Consume the acknowledgement that trails a probe report
    ///
    /// Waits at most `window`. Returns `true` if an `ok` was read, `false`
    /// if the window passed or the firmware answered with an error.
    pub fn expect_ack(&self, cancel: &CancelToken, window: Duration) -> Result<bool, ChannelError> {
        let started = Instant::now();
        while started.elapsed() < window {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let Some(line) = self.read_next()? else {
                continue;
            };
            match classify(&line) {
                ResponseClass::Ok => return Ok(true),
                ResponseClass::Error(_) => return Ok(false),
                ResponseClass::Alarm(code) => {
                    return Err(ChannelError::Alarm {
                        command: "(probe acknowledgement)".to_string(),
                        code,
                        line,
                    })
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// Query the real-time status report
    ///
    /// Lines that are not a status report are skipped. Gives up after the
    /// response timeout, or one second when waits are unbounded.
    pub fn query_status(&self, cancel: &CancelToken) -> Result<Option<StatusReport>, ChannelError> {
        let command = Command::status_query();
        {
            let mut transport = self.transport.lock();
            write_command(transport.as_mut(), self.audit.as_ref(), &command)?;
        }

        let window = self
            .config
            .response_timeout
            .unwrap_or(Duration::from_secs(1));
        let started = Instant::now();
        while started.elapsed() < window && !cancel.is_cancelled() {
            if let Some(line) = self.read_next()? {
                if let Some(report) = parse_status_report(&line) {
                    return Ok(Some(report));
                }
            }
        }
        Ok(None)
    }

    fn await_response(
        &self,
        command: &Command,
        policy: WaitPolicy,
        cancel: &CancelToken,
    ) -> Result<ResponseLines, ChannelError> {
        let limit = match policy {
            WaitPolicy::WaitForProbeReport => Some(self.config.probe_timeout),
            _ => self.config.response_timeout,
        };
        let started = Instant::now();
        let mut lines = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled {
                    command: command.text(),
                });
            }
            if let Some(limit) = limit {
                if started.elapsed() >= limit {
                    let timeout_ms = limit.as_millis() as u64;
                    tracing::warn!("No response to {} after {}ms", command, timeout_ms);
                    return Err(match policy {
                        WaitPolicy::WaitForProbeReport => ChannelError::NoProbeReport { timeout_ms },
                        _ => ChannelError::Timeout {
                            command: command.text(),
                            timeout_ms,
                        },
                    });
                }
            }

            let Some(line) = self.read_next()? else {
                continue;
            };
            let class = classify(&line);
            lines.push(line.clone());

            match (policy, class) {
                (_, ResponseClass::Alarm(code)) => {
                    tracing::error!("Alarm after {}: {}", command, line);
                    return Err(ChannelError::Alarm {
                        command: command.text(),
                        code,
                        line,
                    });
                }
                (_, ResponseClass::Error(code)) => {
                    return Err(ChannelError::Firmware {
                        command: command.text(),
                        code,
                        line,
                    });
                }
                (WaitPolicy::WaitForOkOrError, ResponseClass::Ok) => {
                    return Ok(ResponseLines { lines });
                }
                (WaitPolicy::WaitForProbeReport, ResponseClass::ProbeReport(_)) => {
                    return Ok(ResponseLines { lines });
                }
                _ => {}
            }
        }
    }

    /// One bounded read; empty and undecodable lines come back as `None`
    fn read_next(&self) -> Result<Option<String>, ChannelError> {
        let raw = self
            .transport
            .lock()
            .read_line(self.config.poll_interval)
            .map_err(|e| {
                tracing::error!("Transport read failed: {}", e);
                ChannelError::io(e)
            })?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let line = match String::from_utf8(raw) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!("Discarding undecodable response: {}", e);
                String::new()
            }
        };
        if line.is_empty() {
            return Ok(None);
        }

        self.audit
            .record(AuditEntry::now(AuditKind::Received(line.clone())));
        Ok(Some(line))
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on the transport for operator sequences
///
/// Commands sent through the guard are written and flushed but never
/// waited on, whatever their policy.
pub struct ChannelGuard<'a> {
    transport: MutexGuard<'a, Box<dyn Transport>>,
    audit: &'a dyn AuditSink,
}

impl ChannelGuard<'_> {
    /// Write and flush a command
    pub fn send(&mut self, command: &Command) -> Result<(), ChannelError> {
        write_command(self.transport.as_mut(), self.audit, command)
    }

    /// Discard pending input and output
    pub fn reset_buffers(&mut self) -> Result<(), ChannelError> {
        self.transport
            .reset_input_buffer()
            .and_then(|_| self.transport.reset_output_buffer())
            .map_err(ChannelError::io)
    }

    /// Whether the transport is the dummy stand-in
    pub fn is_dummy(&self) -> bool {
        self.transport.is_dummy()
    }
}

fn write_command(
    transport: &mut dyn Transport,
    audit: &dyn AuditSink,
    command: &Command,
) -> Result<(), ChannelError> {
    let result = transport
        .write_all(&command.to_bytes())
        .and_then(|_| transport.flush());

    match result {
        Ok(()) => {
            audit.record(AuditEntry::now(AuditKind::Sent(command.text())));
            Ok(())
        }
        Err(e) => {
            tracing::error!("Failed to send {}: {}", command, e);
            audit.record(AuditEntry::now(AuditKind::Error(format!(
                "write {} failed: {}",
                command, e
            ))));
            Err(ChannelError::io(e))
        }
    }
}
