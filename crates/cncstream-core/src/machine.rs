//! The machine entity
//!
//! `Machine` is the single source of truth for the supervisory state. It is
//! shared between the operator thread and the worker thread behind an
//! `Arc`; all mutation goes through the methods here so that every
//! transition is validated, recorded exactly once in the audit sink and
//! published to subscribers. The machine does not log on its own; a
//! [`TracingAudit`](crate::audit::TracingAudit) in the sink writes the log.

use crate::audit::{AuditEntry, AuditKind, AuditSink};
use crate::error::InvalidTransition;
use crate::event::{EventDispatcher, StatusEvent, StatusKind};
use crate::state::MachineState;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A program line as dispatched to the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineContext {
    /// 1-based line number in the program file
    pub number: usize,
    /// Trimmed line text
    pub text: String,
}

impl std::fmt::Display for LineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.number, self.text)
    }
}

/// Point-in-time copy of the machine fields
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSnapshot {
    /// Current state
    pub state: MachineState,
    /// Latest status text
    pub status: String,
    /// Last program line sent
    pub last_dispatched: Option<LineContext>,
    /// Reference tool Z from the last tool change
    pub reference_z: Option<f64>,
}

#[derive(Debug)]
struct MachineInner {
    state: MachineState,
    status: String,
    last_dispatched: Option<LineContext>,
    reference_z: Option<f64>,
}

/// Process-wide machine state
pub struct Machine {
    inner: RwLock<MachineInner>,
    events: EventDispatcher,
    audit: Arc<dyn AuditSink>,
}

impl Machine {
    /// Create a machine in `Ready` that records to `audit`
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self::with_events(audit, EventDispatcher::default())
    }

    /// Create a machine publishing on an existing dispatcher
    pub fn with_events(audit: Arc<dyn AuditSink>, events: EventDispatcher) -> Self {
        Self {
            inner: RwLock::new(MachineInner {
                state: MachineState::Ready,
                status: MachineState::Ready.to_string(),
                last_dispatched: None,
                reference_z: None,
            }),
            events,
            audit,
        }
    }

    /// Current state
    pub fn state(&self) -> MachineState {
        self.inner.read().state
    }

    /// Latest status text
    pub fn status(&self) -> String {
        self.inner.read().status.clone()
    }

    /// Copy of all fields under one read lock
    pub fn snapshot(&self) -> MachineSnapshot {
        let inner = self.inner.read();
        MachineSnapshot {
            state: inner.state,
            status: inner.status.clone(),
            last_dispatched: inner.last_dispatched.clone(),
            reference_z: inner.reference_z,
        }
    }

    /// Move to `next`, returning the prior state
    ///
    /// The status text becomes the new state's name.
    pub fn transition(&self, next: MachineState) -> Result<MachineState, InvalidTransition> {
        self.transition_with_status(next, next.to_string())
    }

    /// Move to `next` and set a specific status text
    pub fn transition_with_status(
        &self,
        next: MachineState,
        text: impl Into<String>,
    ) -> Result<MachineState, InvalidTransition> {
        self.apply(None, next, text.into(), |_| {})
    }

    /// Move from `from` to `next`, failing if the machine is elsewhere
    ///
    /// The check and the change happen under one lock, so a concurrent
    /// transition cannot slip in between.
    pub fn transition_from(
        &self,
        from: MachineState,
        next: MachineState,
    ) -> Result<MachineState, InvalidTransition> {
        self.apply(Some(from), next, next.to_string(), |_| {})
    }

    /// Capture the reference tool Z and move to `ProbingNewTool` atomically
    pub fn enter_new_tool_probe(&self, reference_z: f64) -> Result<MachineState, InvalidTransition> {
        self.apply(
            Some(MachineState::ProbingReferenceTool),
            MachineState::ProbingNewTool,
            format!("Reference Z {:.4}; change the tool and confirm", reference_z),
            |inner| inner.reference_z = Some(reference_z),
        )
    }

    fn apply(
        &self,
        expected: Option<MachineState>,
        next: MachineState,
        text: String,
        on_enter: impl FnOnce(&mut MachineInner),
    ) -> Result<MachineState, InvalidTransition> {
        let prior = {
            let mut inner = self.inner.write();
            let prior = inner.state;
            if expected.is_some_and(|e| e != prior) || !prior.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: prior,
                    to: next,
                });
            }
            inner.state = next;
            inner.status = text.clone();
            on_enter(&mut inner);
            // Recorded under the lock so the log order matches the state order
            self.audit.record(AuditEntry::now(AuditKind::Transition {
                from: prior,
                to: next,
            }));
            prior
        };

        self.events.publish(StatusEvent::new(
            next,
            text,
            StatusKind::StateChanged { from: prior },
        ));
        Ok(prior)
    }

    /// Log and drop a request that is not valid in the current state
    pub fn ignore(&self, request: &str) {
        let state = self.state();
        self.audit.record(AuditEntry::now(AuditKind::Ignored {
            request: request.to_string(),
            state,
        }));
    }

    /// Update the status text and notify subscribers
    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        let state = {
            let mut inner = self.inner.write();
            inner.status = text.clone();
            inner.state
        };
        self.events
            .publish(StatusEvent::new(state, text, StatusKind::Progress));
    }

    /// Surface an error on the status line and in the audit log
    pub fn report_error(&self, text: impl Into<String>) {
        let text = text.into();
        self.audit.record(AuditEntry::now(AuditKind::Error(text.clone())));
        let state = {
            let mut inner = self.inner.write();
            inner.status = text.clone();
            inner.state
        };
        self.events
            .publish(StatusEvent::new(state, text, StatusKind::Error));
    }

    /// Record a milestone in the audit log
    pub fn note(&self, text: impl Into<String>) {
        self.audit
            .record(AuditEntry::now(AuditKind::Note(text.into())));
    }

    /// Remember the last program line handed to the channel
    pub fn record_dispatch(&self, number: usize, text: &str) {
        self.inner.write().last_dispatched = Some(LineContext {
            number,
            text: text.to_string(),
        });
    }

    /// Last program line handed to the channel
    pub fn last_dispatched(&self) -> Option<LineContext> {
        self.inner.read().last_dispatched.clone()
    }

    /// Forget the dispatch cursor (new job)
    pub fn clear_dispatch(&self) {
        self.inner.write().last_dispatched = None;
    }

    /// Reference tool Z captured on entry to `ProbingNewTool`
    pub fn reference_z(&self) -> Option<f64> {
        self.inner.read().reference_z
    }

    /// Subscribe to status events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// The event dispatcher this machine publishes on
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// The audit sink this machine records to
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("inner", &*self.inner.read())
            .finish()
    }
}
