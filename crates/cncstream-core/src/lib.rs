//! # cncstream Core
//!
//! Core types for the cncstream supervisor.
//! Provides the machine state machine, status events, the audit log
//! abstraction, cooperative cancellation, and the error taxonomy shared by
//! every other crate.

pub mod audit;
pub mod cancel;
pub mod error;
pub mod event;
pub mod machine;
pub mod state;

pub use audit::{AuditEntry, AuditKind, AuditSink, FanoutAudit, FileAudit, MemoryAudit, TracingAudit};
pub use cancel::CancelToken;
pub use error::{
    ChannelError, ControlError, InvalidTransition, JobError, ProbeError, ProbePhase,
};
pub use event::{EventDispatcher, StatusEvent, StatusKind};
pub use machine::{LineContext, Machine, MachineSnapshot};
pub use state::{Affordances, MachineState, PauseLabel};
