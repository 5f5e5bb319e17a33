#![allow(dead_code)]

use cncstream_communication::{ChannelConfig, CommandChannel, Transport};
use cncstream_control::MachineContext;
use cncstream_core::{Machine, MachineState, MemoryAudit};
use cncstream_settings::Config;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct Script {
    written: Vec<String>,
    pending: VecDeque<String>,
    responder: Responder,
    /// Lines whose acknowledgement is withheld until `release` is called
    hold_on: Option<String>,
    held: Vec<String>,
}

/// Simulated controller: logs every write and answers through a responder
#[derive(Clone)]
pub struct ScriptedController {
    script: Arc<Mutex<Script>>,
}

impl ScriptedController {
    pub fn new(responder: impl FnMut(&str) -> Vec<String> + Send + 'static) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                written: Vec::new(),
                pending: VecDeque::new(),
                responder: Box::new(responder),
                hold_on: None,
                held: Vec::new(),
            })),
        }
    }

    /// Acknowledge every line with `ok`; real-time bytes are silent
    pub fn acking() -> Self {
        Self::new(|line| {
            if line.len() == 1 || line.starts_with("0x") || line.is_empty() {
                Vec::new()
            } else {
                vec!["ok".to_string()]
            }
        })
    }

    /// Probe at `fast` on the F200 touch and `slow` on the F100 touch
    pub fn probing(fast: f64, slow: f64) -> Self {
        Self::new(move |line| {
            if line.starts_with("G38.2") && line.ends_with("F200") {
                vec![format!("PRB:0,0,{}", fast), "ok".to_string()]
            } else if line.starts_with("G38.2") {
                vec![format!("[PRB:0.000,0.000,{:.3}:1]", slow), "ok".to_string()]
            } else if line.len() == 1 || line.starts_with("0x") {
                Vec::new()
            } else {
                vec!["ok".to_string()]
            }
        })
    }

    /// Withhold replies to `line` until `release`
    pub fn hold_on(&self, line: &str) {
        self.script.lock().hold_on = Some(line.to_string());
    }

    pub fn release(&self) {
        let mut script = self.script.lock();
        script.hold_on = None;
        let held: Vec<String> = script.held.drain(..).collect();
        script.pending.extend(held);
    }

    pub fn written(&self) -> Vec<String> {
        self.script.lock().written.clone()
    }

    /// Written lines that are not real-time bytes or control commands
    pub fn program_lines(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .filter(|l| !matches!(l.as_str(), "$H" | "M5" | "!" | "~" | "?" | "0x18" | ""))
            .collect()
    }

    pub fn count(&self, line: &str) -> usize {
        self.written().iter().filter(|l| *l == line).count()
    }
}

impl Transport for ScriptedController {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let text = match data {
            [byte] if !byte.is_ascii_graphic() => format!("0x{:02X}", byte),
            _ => String::from_utf8_lossy(data).trim_end().to_string(),
        };
        let mut script = self.script.lock();
        let replies = (script.responder)(&text);
        if script.hold_on.as_deref() == Some(text.as_str()) {
            script.held.extend(replies);
        } else {
            script.pending.extend(replies);
        }
        script.written.push(text);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let next = self.script.lock().pending.pop_front();
        match next {
            Some(line) => Ok(Some(line.into_bytes())),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.script.lock().pending.clear();
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.job.pause_poll_ms = 5;
    config.job.settle_ms = 0;
    config.probe.settle_ms = 0;
    config.probe.ack_window_ms = 200;
    config.probe.report_timeout_ms = 500;
    config
}

pub fn context(controller: &ScriptedController) -> (MachineContext, Arc<MemoryAudit>) {
    context_with(controller, test_config())
}

pub fn context_with(
    controller: &ScriptedController,
    config: Config,
) -> (MachineContext, Arc<MemoryAudit>) {
    let audit = Arc::new(MemoryAudit::default());
    let channel = CommandChannel::new(
        Box::new(controller.clone()),
        ChannelConfig {
            poll_interval: Duration::from_millis(2),
            response_timeout: Some(Duration::from_secs(2)),
            probe_timeout: config.probe.report_timeout(),
        },
        audit.clone(),
    );
    let machine = Machine::new(audit.clone());
    (
        MachineContext::new(Arc::new(machine), Arc::new(channel), config),
        audit,
    )
}

/// Poll until `machine` reaches `state` or two seconds pass
pub fn wait_for_state(machine: &Machine, state: MachineState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if machine.state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Poll until `predicate` holds or two seconds pass
pub fn eventually(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

pub fn program(contents: &str) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
