//! Operator request API
//!
//! The `Supervisor` is the only way the front end acts on the machine. Quick
//! control actions (pause, resume, stop, home out of `Stopped`) run on the
//! caller's thread and write under the channel lock without waiting for a
//! response. Long-running work (a job, a probe phase, a positioning move, a
//! re-home from `Ready`) runs on a single named worker thread; a second start
//! while one is active is rejected with [`ControlError::Busy`].
//!
//! Requests that are not valid in the current state are logged and ignored.

use crate::context::MachineContext;
use crate::job::{JobOutcome, JobRunner};
use crate::probe;
use cncstream_communication::{Command, StatusReport};
use cncstream_core::{
    CancelToken, ChannelError, ControlError, Machine, MachineState, ProbeError,
};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use uuid::Uuid;

/// What a worker thread is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Job,
    ReferenceProbe,
    NewToolProbe,
    LoadPosition,
    Home,
}

impl WorkerKind {
    fn thread_name(self) -> &'static str {
        match self {
            Self::Job => "job-runner",
            Self::ReferenceProbe | Self::NewToolProbe => "tool-probe",
            Self::LoadPosition => "load-position",
            Self::Home => "homing",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job => write!(f, "job"),
            Self::ReferenceProbe => write!(f, "reference probe"),
            Self::NewToolProbe => write!(f, "new tool probe"),
            Self::LoadPosition => write!(f, "load position"),
            Self::Home => write!(f, "home"),
        }
    }
}

/// Handle to a worker started by the supervisor
///
/// Dropping the handle does not stop the worker.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: Uuid,
    kind: WorkerKind,
    outcome: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Unique id, also used in the log
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kind of work
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Block until the worker finishes
    ///
    /// Returns `None` if the worker died without reporting. Must not be
    /// called from inside an async runtime.
    pub fn wait(self) -> Option<T> {
        self.outcome.blocking_recv().ok()
    }

    /// The outcome, if the worker has finished
    pub fn try_outcome(&mut self) -> Option<T> {
        self.outcome.try_recv().ok()
    }
}

struct ActiveWorker {
    id: Uuid,
    kind: WorkerKind,
    cancel: CancelToken,
    /// Set before the outcome is delivered
    done: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ActiveWorker {
    fn is_active(&self) -> bool {
        !self.done.load(Ordering::SeqCst) && !self.thread.is_finished()
    }
}

/// Operator-facing control of one machine
pub struct Supervisor {
    ctx: MachineContext,
    worker: Mutex<Option<ActiveWorker>>,
}

impl Supervisor {
    pub fn new(ctx: MachineContext) -> Self {
        Self {
            ctx,
            worker: Mutex::new(None),
        }
    }

    /// Shared context
    pub fn context(&self) -> &MachineContext {
        &self.ctx
    }

    /// The machine this supervisor drives
    pub fn machine(&self) -> &Machine {
        &self.ctx.machine
    }

    /// Current state
    pub fn state(&self) -> MachineState {
        self.ctx.machine.state()
    }

    /// Whether a worker thread is still running
    pub fn is_busy(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(ActiveWorker::is_active)
    }

    /// Start streaming `path` (or the configured program when `None`)
    pub fn run(&self, path: Option<PathBuf>) -> Result<JobHandle<JobOutcome>, ControlError> {
        let Some(path) = path.or_else(|| self.ctx.settings.job.program_path.clone()) else {
            self.ctx.machine.report_error("No program selected");
            return Err(self.not_allowed("run without a program"));
        };

        let enter = (MachineState::Ready, MachineState::Running);
        self.spawn(WorkerKind::Job, Some(enter), move |ctx, cancel| {
            JobRunner::new(ctx, cancel).run(&path)
        })
    }

    /// Pause when running, resume when paused
    pub fn pause_or_resume(&self) -> Result<bool, ChannelError> {
        match self.state() {
            MachineState::Running => self.pause(),
            MachineState::Paused => self.resume(),
            _ => {
                self.ctx.machine.ignore("pause/resume");
                Ok(false)
            }
        }
    }

    /// Feed hold; only from `Running`
    pub fn pause(&self) -> Result<bool, ChannelError> {
        self.realtime_transition(
            "pause",
            MachineState::Running,
            MachineState::Paused,
            Command::feed_hold(),
        )
    }

    /// Cycle start; only from `Paused`
    pub fn resume(&self) -> Result<bool, ChannelError> {
        self.realtime_transition(
            "resume",
            MachineState::Paused,
            MachineState::Running,
            Command::cycle_start(),
        )
    }

    fn realtime_transition(
        &self,
        request: &str,
        from: MachineState,
        next: MachineState,
        command: Command,
    ) -> Result<bool, ChannelError> {
        let mut guard = self.ctx.channel.exclusive();
        if self.ctx.machine.transition_from(from, next).is_err() {
            drop(guard);
            self.ctx.machine.ignore(request);
            return Ok(false);
        }
        if !guard.is_dummy() {
            guard.send(&command)?;
        }
        Ok(true)
    }

    /// Stop everything: feed hold, spindle stop, soft reset
    ///
    /// Valid from every state except `Stopped`. The state changes under the
    /// channel lock, so no program line can be written after this returns.
    pub fn stop(&self) -> Result<bool, ChannelError> {
        let result = {
            let mut guard = self.ctx.channel.exclusive();
            if self.ctx.machine.transition(MachineState::Stopped).is_err() {
                drop(guard);
                self.ctx.machine.ignore("stop");
                return Ok(false);
            }
            [Command::feed_hold(), Command::spindle_stop(), Command::soft_reset()]
                .iter()
                .try_for_each(|command| guard.send(command))
                .and_then(|_| guard.reset_buffers())
        };

        if let Some(worker) = self.worker.lock().as_ref() {
            tracing::info!("Cancelling {} worker {}", worker.kind, worker.id);
            worker.cancel.cancel();
        }

        result.map(|_| true)
    }

    /// Home (`$H`)
    ///
    /// From `Stopped` this returns the machine to `Ready`. From `Ready` it
    /// re-homes on the worker thread without a state change; see
    /// [`Supervisor::rehome`].
    pub fn home(&self) -> Result<bool, ChannelError> {
        let mut guard = self.ctx.channel.exclusive();
        match self.ctx.machine.state() {
            MachineState::Stopped => {
                guard.send(&Command::home())?;
                guard.reset_buffers()?;
                if let Err(e) = self.ctx.machine.transition(MachineState::Ready) {
                    tracing::warn!("{}", e);
                }
                Ok(true)
            }
            MachineState::Ready => {
                drop(guard);
                match self.rehome() {
                    Ok(handle) => {
                        tracing::debug!("Re-homing as {} worker {}", handle.kind(), handle.id());
                        Ok(true)
                    }
                    Err(ControlError::Busy { .. }) => {
                        self.ctx.machine.ignore("home");
                        Ok(false)
                    }
                    Err(_) => Ok(false),
                }
            }
            _ => {
                drop(guard);
                self.ctx.machine.ignore("home");
                Ok(false)
            }
        }
    }

    /// Re-home from `Ready` and wait for the controller's `ok`
    ///
    /// Runs as a worker so the acknowledgement is consumed here rather than
    /// by the next command sent.
    pub fn rehome(&self) -> Result<JobHandle<Result<(), ChannelError>>, ControlError> {
        if self.state() != MachineState::Ready {
            self.ctx.machine.ignore("home");
            return Err(self.not_allowed("home"));
        }

        self.spawn(WorkerKind::Home, None, |ctx, cancel| {
            ctx.machine.set_status("Homing");
            let result = ctx.channel.send_gated(&Command::home(), &cancel, || {
                ctx.machine.state() == MachineState::Ready
            });
            match result {
                Ok(Some(_)) => {
                    ctx.machine.set_status("Homed");
                    Ok(())
                }
                Ok(None) | Err(ChannelError::Cancelled { .. }) => {
                    ctx.machine.ignore("home");
                    Ok(())
                }
                Err(e) => {
                    ctx.machine.report_error(format!("Homing failed: {}", e));
                    Err(e)
                }
            }
        })
    }

    /// Move out of the way for loading stock; only from `Ready`
    pub fn move_to_load_position(
        &self,
    ) -> Result<JobHandle<Result<(), ChannelError>>, ControlError> {
        if self.state() != MachineState::Ready {
            self.ctx.machine.ignore("move to load position");
            return Err(self.not_allowed("move to load position"));
        }

        self.spawn(WorkerKind::LoadPosition, None, |ctx, cancel| {
            let load = ctx.settings.load_position;
            let command = Command::rapid_xyz(load.x, load.y, load.z);
            let result = ctx.channel.send_gated(&command, &cancel, || {
                ctx.machine.state() == MachineState::Ready
            });
            match result {
                Ok(Some(_)) => {
                    ctx.machine.set_status(format!("Sent: {}", command));
                    Ok(())
                }
                Ok(None) => {
                    ctx.machine.ignore("move to load position");
                    Ok(())
                }
                Err(e) => {
                    ctx.machine.report_error(format!("Load position move failed: {}", e));
                    Err(e)
                }
            }
        })
    }

    /// Phase 1 of a tool change: measure the reference tool
    ///
    /// Allowed from `Ready`, or from `ProbingReferenceTool` to retry.
    pub fn begin_tool_change(&self) -> Result<JobHandle<Result<f64, ProbeError>>, ControlError> {
        let enter = match self.state() {
            MachineState::Ready => Some((MachineState::Ready, MachineState::ProbingReferenceTool)),
            MachineState::ProbingReferenceTool => None,
            _ => {
                self.ctx.machine.ignore("tool change");
                return Err(self.not_allowed("begin a tool change"));
            }
        };

        self.spawn(WorkerKind::ReferenceProbe, enter, |ctx, cancel| {
            let result = probe::probe_reference(&ctx, &cancel);
            report_probe(&ctx, &result);
            result
        })
    }

    /// Phase 2 of a tool change: measure the new tool and apply the offset
    pub fn confirm_new_tool(&self) -> Result<JobHandle<Result<f64, ProbeError>>, ControlError> {
        if self.state() != MachineState::ProbingNewTool {
            self.ctx.machine.ignore("confirm new tool");
            return Err(self.not_allowed("confirm the new tool"));
        }

        self.spawn(WorkerKind::NewToolProbe, None, |ctx, cancel| {
            let result = probe::probe_new_tool(&ctx, &cancel);
            report_probe(&ctx, &result);
            result
        })
    }

    /// Ask the controller for a status report
    ///
    /// Only while idle: a running worker owns the response stream.
    pub fn query_status(&self) -> Result<Option<StatusReport>, ChannelError> {
        if self.is_busy() {
            self.ctx.machine.ignore("status query");
            return Ok(None);
        }
        let report = self.ctx.channel.query_status(&CancelToken::new())?;
        if let Some(report) = &report {
            let status = match report.machine_pos {
                Some(pos) => format!(
                    "{} at X{:.3} Y{:.3} Z{:.3}",
                    report.state, pos.x, pos.y, pos.z
                ),
                None => report.state.clone(),
            };
            self.ctx.machine.set_status(status);
        }
        Ok(report)
    }

    /// Cancel and join the active worker
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            tracing::info!("Shutting down {} worker {}", worker.kind, worker.id);
            worker.cancel.cancel();
            if worker.thread.join().is_err() {
                tracing::error!("{} worker {} panicked", worker.kind, worker.id);
            }
        }
    }

    fn not_allowed(&self, verb: &str) -> ControlError {
        ControlError::NotAllowed {
            verb: verb.to_string(),
            state: self.state(),
        }
    }

    /// Start `work` on the worker thread
    ///
    /// `enter` (from, to) is applied before the thread starts, under the
    /// worker lock, so a concurrent request sees the new state or `Busy`.
    fn spawn<T, F>(
        &self,
        kind: WorkerKind,
        enter: Option<(MachineState, MachineState)>,
        work: F,
    ) -> Result<JobHandle<T>, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(MachineContext, CancelToken) -> T + Send + 'static,
    {
        let mut slot = self.worker.lock();

        if let Some(active) = slot.as_ref() {
            if active.is_active() {
                tracing::warn!("Rejecting {} start: {} worker active", kind, active.kind);
                return Err(ControlError::Busy {
                    active: active.kind.to_string(),
                });
            }
        }
        if let Some(finished) = slot.take() {
            if finished.thread.join().is_err() {
                tracing::error!("{} worker {} panicked", finished.kind, finished.id);
            }
        }

        let prior = match enter {
            Some((from, next)) => match self.ctx.machine.transition_from(from, next) {
                Ok(prior) => Some(prior),
                Err(e) => {
                    self.ctx.machine.ignore(&kind.to_string());
                    return Err(ControlError::NotAllowed {
                        verb: kind.to_string(),
                        state: e.from,
                    });
                }
            },
            None => None,
        };

        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let worker_cancel = cancel.clone();
        let done = Arc::new(AtomicBool::new(false));
        let worker_done = done.clone();

        let spawned = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || {
                tracing::debug!("{} worker {} started", kind, id);
                let outcome = work(ctx, worker_cancel);
                tracing::debug!("{} worker {} finished", kind, id);
                worker_done.store(true, Ordering::SeqCst);
                // The handle may have been dropped
                let _ = tx.send(outcome);
            });

        match spawned {
            Ok(thread) => {
                *slot = Some(ActiveWorker {
                    id,
                    kind,
                    cancel,
                    done,
                    thread,
                });
                Ok(JobHandle {
                    id,
                    kind,
                    outcome: rx,
                })
            }
            Err(e) => {
                if let Some(prior) = prior {
                    if let Err(e) = self.ctx.machine.transition(prior) {
                        tracing::warn!("{}", e);
                    }
                }
                self.ctx
                    .machine
                    .report_error(format!("Failed to start {}: {}", kind, e));
                Err(ControlError::Spawn {
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn report_probe(ctx: &MachineContext, result: &Result<f64, ProbeError>) {
    if let Err(e) = result {
        ctx.machine.report_error(e.to_string());
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
