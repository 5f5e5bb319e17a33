//! # cncstream Communication
//!
//! Firmware communication for cncstream: byte transports (serial and a
//! dummy stand-in), GRBL command construction and response classification,
//! and the depth-1 command channel every other component sends through.

pub mod channel;
pub mod grbl;
pub mod transport;

pub use channel::{ChannelConfig, ChannelGuard, CommandChannel, ResponseLines};
pub use grbl::{describe_failure, Command, ResponseClass, StatusReport, WaitPolicy};
pub use transport::{
    first_available_port, list_ports, DummyTransport, LineBuffer, SerialPortInfo, SerialTransport,
    Transport,
};
