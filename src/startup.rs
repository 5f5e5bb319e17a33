//! Startup wiring
//!
//! Turns a loaded [`Config`] into a running [`Supervisor`]: picks the
//! transport, assembles the audit sinks, wakes the controller and builds the
//! shared machine context.

use anyhow::Context;
use cncstream_communication::{
    first_available_port, ChannelConfig, CommandChannel, DummyTransport, SerialTransport,
    Transport,
};
use cncstream_control::{MachineContext, Supervisor};
use cncstream_core::{AuditSink, FanoutAudit, FileAudit, Machine, MemoryAudit, TracingAudit};
use cncstream_settings::{Config, ConnectionSettings, LoggingSettings, PortSelection};
use std::sync::Arc;

/// Entries kept for the console `log` verb
const RECENT_AUDIT_CAPACITY: usize = 500;

/// A connected supervisor plus the in-memory audit tail
pub struct Session {
    pub supervisor: Supervisor,
    pub recent: Arc<MemoryAudit>,
}

/// Open the transport named by `settings.port`
///
/// `auto` falls back to the dummy transport when no controller-looking port
/// is present.
pub fn open_transport(settings: &ConnectionSettings) -> anyhow::Result<Box<dyn Transport>> {
    match settings.port_selection() {
        PortSelection::Dummy => {
            tracing::info!("Using dummy transport");
            Ok(Box::new(DummyTransport::new()))
        }
        PortSelection::Path(path) => {
            let transport = SerialTransport::open(&path, settings.baud_rate)
                .with_context(|| format!("opening {}", path))?;
            Ok(Box::new(transport))
        }
        PortSelection::Auto => match first_available_port() {
            Ok(Some(port)) => {
                tracing::info!("Found {} ({})", port.port_name, port.description);
                let transport = SerialTransport::open(&port.port_name, settings.baud_rate)
                    .with_context(|| format!("opening {}", port.port_name))?;
                Ok(Box::new(transport))
            }
            Ok(None) => {
                tracing::warn!("No controller port found; using dummy transport");
                Ok(Box::new(DummyTransport::new()))
            }
            Err(e) => {
                tracing::warn!("Port discovery failed ({}); using dummy transport", e);
                Ok(Box::new(DummyTransport::new()))
            }
        },
    }
}

/// Audit to the log, the optional audit file, and `recent`
pub fn build_audit(
    settings: &LoggingSettings,
    recent: Arc<MemoryAudit>,
) -> anyhow::Result<Arc<dyn AuditSink>> {
    let mut fanout = FanoutAudit::new()
        .with(Arc::new(TracingAudit))
        .with(recent);

    if let Some(path) = &settings.audit_log {
        let file = FileAudit::open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        tracing::info!("Appending audit entries to {}", path.display());
        fanout = fanout.with(Arc::new(file));
    }

    Ok(Arc::new(fanout))
}

/// Connect, wake the controller and build the supervisor
pub fn start(config: Config) -> anyhow::Result<Session> {
    let recent = Arc::new(MemoryAudit::new(RECENT_AUDIT_CAPACITY));
    let audit = build_audit(&config.logging, recent.clone())?;

    let transport = open_transport(&config.connection)?;
    let channel = CommandChannel::new(
        transport,
        ChannelConfig {
            poll_interval: config.connection.poll_interval(),
            response_timeout: config.connection.response_timeout(),
            probe_timeout: config.probe.report_timeout(),
        },
        audit.clone(),
    );

    if !channel.is_dummy() {
        channel
            .wake(config.connection.wake_delay())
            .context("waking controller")?;
    }

    let machine = Machine::new(audit);
    let ctx = MachineContext::new(Arc::new(machine), Arc::new(channel), config);
    Ok(Session {
        supervisor: Supervisor::new(ctx),
        recent,
    })
}
