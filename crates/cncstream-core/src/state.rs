//! Machine state definitions
//!
//! The supervisory state of the router, the table of legal transitions
//! between states, and the set of operator controls each state exposes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical state of the machine as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// Idle and accepting new work
    #[default]
    Ready,
    /// Streaming a program
    Running,
    /// Streaming suspended by a feed hold
    Paused,
    /// Aborted by the operator; waiting for a home cycle or job cleanup
    Stopped,
    /// Measuring the reference tool
    ProbingReferenceTool,
    /// Waiting for, or measuring, the replacement tool
    ProbingNewTool,
}

impl MachineState {
    /// Whether moving from `self` to `next` is a legal edge
    pub fn can_transition_to(self, next: MachineState) -> bool {
        use MachineState::*;

        // Stop is reachable from everywhere as a safety override
        if next == Stopped {
            return self != Stopped;
        }

        match (self, next) {
            (Ready, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Ready) | (Paused, Ready) => true,
            (Stopped, Ready) => true,
            (Ready, ProbingReferenceTool) => true,
            (ProbingReferenceTool, ProbingNewTool) => true,
            (ProbingNewTool, Ready) => true,
            _ => false,
        }
    }

    /// Whether program lines may be transmitted in this state
    pub fn permits_streaming(self) -> bool {
        matches!(self, MachineState::Running)
    }

    /// Whether this is one of the tool-change probing states
    pub fn is_probing(self) -> bool {
        matches!(
            self,
            MachineState::ProbingReferenceTool | MachineState::ProbingNewTool
        )
    }

    /// Controls the front end should show in this state
    pub fn affordances(self) -> Affordances {
        use MachineState::*;

        match self {
            Ready => Affordances {
                set: true,
                home: true,
                run: true,
                pause: None,
                stop: true,
                tool_change: true,
                confirm_tool: false,
            },
            Running => Affordances {
                run: true,
                pause: Some(PauseLabel::Pause),
                stop: true,
                ..Affordances::none()
            },
            Paused => Affordances {
                run: true,
                pause: Some(PauseLabel::Resume),
                stop: true,
                ..Affordances::none()
            },
            Stopped => Affordances {
                home: true,
                ..Affordances::none()
            },
            ProbingReferenceTool => Affordances {
                stop: true,
                tool_change: true,
                ..Affordances::none()
            },
            ProbingNewTool => Affordances {
                stop: true,
                confirm_tool: true,
                ..Affordances::none()
            },
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopped => write!(f, "Stopped"),
            Self::ProbingReferenceTool => write!(f, "Probing reference tool"),
            Self::ProbingNewTool => write!(f, "Probing new tool"),
        }
    }
}

/// Label on the pause/resume toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseLabel {
    /// Pressing it pauses
    Pause,
    /// Pressing it resumes
    Resume,
}

/// Visible operator controls for a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordances {
    /// Move to load position
    pub set: bool,
    /// Home the machine
    pub home: bool,
    /// Run the selected program
    pub run: bool,
    /// Pause/resume toggle and its label
    pub pause: Option<PauseLabel>,
    /// Stop the machine
    pub stop: bool,
    /// Begin (or retry) a tool change
    pub tool_change: bool,
    /// Confirm the new tool is fitted
    pub confirm_tool: bool,
}

impl Affordances {
    fn none() -> Self {
        Self {
            set: false,
            home: false,
            run: false,
            pause: None,
            stop: false,
            tool_change: false,
            confirm_tool: false,
        }
    }
}
