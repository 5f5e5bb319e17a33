//! Shared context handed to every worker

use cncstream_communication::CommandChannel;
use cncstream_core::Machine;
use cncstream_settings::Config;
use std::sync::Arc;

/// Machine, channel and settings shared by the supervisor and its workers
#[derive(Debug, Clone)]
pub struct MachineContext {
    pub machine: Arc<Machine>,
    pub channel: Arc<CommandChannel>,
    pub settings: Arc<Config>,
}

impl MachineContext {
    pub fn new(machine: Arc<Machine>, channel: Arc<CommandChannel>, settings: Config) -> Self {
        Self {
            machine,
            channel,
            settings: Arc::new(settings),
        }
    }
}
