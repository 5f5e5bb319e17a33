//! Job runner
//!
//! Streams one program through the command channel while the machine is
//! `Running`, spins while `Paused`, and abandons the program as soon as the
//! machine leaves those two states. Every job ends in the same cleanup:
//! buffers reset, a closing log entry, and a transition back to `Ready`.

use crate::context::MachineContext;
use crate::program::{is_dispatchable, ProgramSource};
use cncstream_communication::{describe_failure, Command};
use cncstream_core::{CancelToken, ChannelError, JobError, MachineState};
use std::path::Path;
use std::thread;

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every line was sent and the completion trailer ran
    Completed {
        /// Program lines written to the controller
        lines_sent: usize,
        /// Lines the firmware answered with `error`
        firmware_errors: usize,
    },
    /// The operator stopped the job
    Stopped,
    /// The file could not be read, or the channel failed fatally
    Failed(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    lines_sent: usize,
    firmware_errors: usize,
}

enum StreamEnd {
    Finished(Progress),
    Stopped,
}

enum Flow {
    Continue,
    Stop,
}

enum Sent {
    Acknowledged,
    Rejected(ChannelError),
    /// The machine was not `Running` at the moment of writing
    Held,
    Cancelled,
}

/// Streams a single program on the worker thread
pub struct JobRunner {
    ctx: MachineContext,
    cancel: CancelToken,
}

impl JobRunner {
    pub fn new(ctx: MachineContext, cancel: CancelToken) -> Self {
        Self { ctx, cancel }
    }

    /// Stream `path` to completion, stop or failure
    ///
    /// The machine is expected to be `Running` already.
    pub fn run(&self, path: &Path) -> JobOutcome {
        let machine = &self.ctx.machine;
        machine.clear_dispatch();
        machine.note(format!("job started: {}", path.display()));

        if let Err(e) = self.ctx.channel.reset_buffers() {
            tracing::warn!("Failed to reset buffers before job: {}", e);
        }

        let result = self.stream(path);
        self.cleanup(result)
    }

    fn stream(&self, path: &Path) -> Result<StreamEnd, JobError> {
        let machine = &self.ctx.machine;

        if let Flow::Stop = self.send_control(&Command::home(), "before the first line")? {
            return Ok(StreamEnd::Stopped);
        }

        let mut progress = Progress::default();
        let source = ProgramSource::open(path)?;

        for line in source {
            let line = line?;

            let at = format!("on line {}: {}", line.number, line.text);
            loop {
                if let Flow::Stop = self.await_running(&at) {
                    return Ok(StreamEnd::Stopped);
                }
                if !is_dispatchable(&line.text) {
                    break;
                }

                match self.send_while_running(&Command::gcode(line.text.as_str()))? {
                    Sent::Acknowledged => {
                        progress.lines_sent += 1;
                        machine.record_dispatch(line.number, &line.text);
                        machine.set_status(format!("Sent line {}: {}", line.number, line.text));
                        break;
                    }
                    Sent::Rejected(e) => {
                        progress.lines_sent += 1;
                        progress.firmware_errors += 1;
                        machine.record_dispatch(line.number, &line.text);
                        tracing::warn!("Line {} rejected: {}", line.number, e);
                        machine.set_status(format!("line {}: {}", line.number, explain(&e)));
                        break;
                    }
                    // Paused or stopped between the state check and the write
                    Sent::Held => continue,
                    Sent::Cancelled => return Ok(StreamEnd::Stopped),
                }
            }
        }

        // A pause after the final line still holds the trailer back
        let at = match machine.last_dispatched() {
            Some(last) => format!("after line {}: {}", last.number, last.text),
            None => "at end of program".to_string(),
        };
        for command in [Command::spindle_stop(), Command::home(), Command::soft_reset()] {
            if let Flow::Stop = self.send_control(&command, &at)? {
                return Ok(StreamEnd::Stopped);
            }
        }
        self.ctx.channel.reset_buffers()?;
        thread::sleep(self.ctx.settings.job.settle());

        Ok(StreamEnd::Finished(progress))
    }

    /// Block while paused; `Stop` once the machine is neither running nor paused
    ///
    /// `at` places the pause in the program, e.g. `on line 3: G1 X20`.
    fn await_running(&self, at: &str) -> Flow {
        let machine = &self.ctx.machine;
        let mut paused = false;

        loop {
            if self.cancel.is_cancelled() {
                return Flow::Stop;
            }
            match machine.state() {
                MachineState::Running => {
                    if paused {
                        machine.set_status(format!("resumed {}", at));
                    }
                    return Flow::Continue;
                }
                MachineState::Paused => {
                    if !paused {
                        paused = true;
                        let status = format!("paused {}", at);
                        machine.note(status.clone());
                        machine.set_status(status);
                    }
                    thread::sleep(self.ctx.settings.job.pause_poll());
                }
                _ => return Flow::Stop,
            }
        }
    }

    /// Send a homing or completion command once the machine is `Running`
    ///
    /// A pause holds the command back until resume; only a stop abandons it.
    /// Firmware rejections are logged and do not end the job.
    fn send_control(&self, command: &Command, at: &str) -> Result<Flow, ChannelError> {
        loop {
            if let Flow::Stop = self.await_running(at) {
                return Ok(Flow::Stop);
            }
            match self.send_while_running(command)? {
                Sent::Acknowledged => return Ok(Flow::Continue),
                Sent::Rejected(e) => {
                    tracing::warn!("'{}' rejected: {}", command, explain(&e));
                    return Ok(Flow::Continue);
                }
                Sent::Held => continue,
                Sent::Cancelled => return Ok(Flow::Stop),
            }
        }
    }

    fn send_while_running(&self, command: &Command) -> Result<Sent, ChannelError> {
        let machine = &self.ctx.machine;
        let sent = self.ctx.channel.send_gated(command, &self.cancel, || {
            machine.state() == MachineState::Running
        });

        match sent {
            Ok(Some(_)) => Ok(Sent::Acknowledged),
            Ok(None) => Ok(Sent::Held),
            Err(ChannelError::Cancelled { .. }) => Ok(Sent::Cancelled),
            Err(e) if e.is_recoverable() => Ok(Sent::Rejected(e)),
            Err(e) => Err(e),
        }
    }

    fn cleanup(&self, result: Result<StreamEnd, JobError>) -> JobOutcome {
        let machine = &self.ctx.machine;

        if let Err(e) = self.ctx.channel.reset_buffers() {
            tracing::warn!("Failed to reset buffers after job: {}", e);
        }

        let (outcome, status) = match result {
            Ok(StreamEnd::Finished(progress)) => {
                machine.note(format!(
                    "toolpath complete: {} lines sent, {} rejected",
                    progress.lines_sent, progress.firmware_errors
                ));
                let outcome = JobOutcome::Completed {
                    lines_sent: progress.lines_sent,
                    firmware_errors: progress.firmware_errors,
                };
                (outcome, MachineState::Ready.to_string())
            }
            Ok(StreamEnd::Stopped) => {
                machine.note("ended due to stop");
                (JobOutcome::Stopped, MachineState::Ready.to_string())
            }
            Err(e) => {
                let reason = match &e {
                    JobError::Channel(channel) => explain(channel),
                    other => other.to_string(),
                };
                machine.report_error(format!("Job failed: {}", reason));
                (JobOutcome::Failed(reason.clone()), format!("Job failed: {}", reason))
            }
        };

        // The operator may already have homed out of Stopped
        if machine.state() != MachineState::Ready {
            if let Err(e) = machine.transition_with_status(MachineState::Ready, status) {
                tracing::warn!("Job cleanup could not return to Ready: {}", e);
            }
        }

        outcome
    }
}

/// Error text with the firmware's meaning of its code, when known
fn explain(error: &ChannelError) -> String {
    match describe_failure(error) {
        Some(meaning) => format!("{} ({})", error, meaning),
        None => error.to_string(),
    }
}
