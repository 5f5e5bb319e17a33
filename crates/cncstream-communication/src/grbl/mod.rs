//! GRBL protocol support
//!
//! Command construction (text blocks and real-time bytes) and response
//! classification for GRBL-class firmware.

pub mod command;
pub mod response;

pub use command::{Command, WaitPolicy, CYCLE_START, FEED_HOLD, SOFT_RESET, STATUS_QUERY};
pub use response::{
    alarm_description, classify, describe_failure, error_description, parse_probe_report,
    parse_probe_z, parse_status_report, Position, ProbeReport, ResponseClass, StatusReport,
};
