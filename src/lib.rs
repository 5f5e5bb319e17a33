//! # cncstream
//!
//! A supervisory G-code streamer for GRBL-class CNC routers. Streams a
//! program one line at a time against firmware acknowledgements while the
//! operator can pause, resume, stop, home, or run a two-phase tool-length
//! probe.
//!
//! ## Architecture
//!
//! The workspace is split into crates:
//!
//! 1. **cncstream-core** - Machine state, status events, audit sinks, errors
//! 2. **cncstream-communication** - Transports, GRBL responses, command channel
//! 3. **cncstream-settings** - Configuration file handling
//! 4. **cncstream-control** - Line source, job runner, probe routine, supervisor
//! 5. **cncstream** - Startup wiring and the operator console binary

pub mod console;
pub mod startup;

pub use cncstream_communication::{
    first_available_port, list_ports, ChannelConfig, Command, CommandChannel, DummyTransport,
    SerialPortInfo, SerialTransport, StatusReport, Transport, WaitPolicy,
};
pub use cncstream_control::{
    JobHandle, JobOutcome, JobRunner, MachineContext, ProgramLine, ProgramSource, Supervisor,
    WorkerKind,
};
pub use cncstream_core::{
    Affordances, AuditEntry, AuditKind, AuditSink, CancelToken, ChannelError, ControlError,
    Machine, MachineSnapshot, MachineState, MemoryAudit, ProbeError, StatusEvent,
};
pub use cncstream_settings::{Config, SettingsError};
pub use startup::{build_audit, open_transport, start, Session};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// `RUST_LOG` wins when set; otherwise `default_level` (a filter directive
/// such as `info` or `cncstream_control=debug`) is used. Output goes to
/// stderr so it does not interleave with console replies.
pub fn init_logging(default_level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
