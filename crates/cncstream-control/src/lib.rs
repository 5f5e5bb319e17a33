//! # cncstream Control
//!
//! Supervision of a GRBL-class router: the program line source, the job
//! runner that streams it, the two-phase tool-length probe routine, and the
//! `Supervisor` that turns operator requests into state transitions and
//! worker threads.

pub mod context;
pub mod job;
pub mod probe;
pub mod program;
pub mod supervisor;

pub use context::MachineContext;
pub use job::{JobOutcome, JobRunner};
pub use probe::{probe_new_tool, probe_reference, probe_tool};
pub use program::{is_dispatchable, ProgramLine, ProgramSource, COMMENT_MARKER};
pub use supervisor::{JobHandle, Supervisor, WorkerKind};
