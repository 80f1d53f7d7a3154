/*!
 * State Machine Types
 * Process lifecycle states, events, and transition records
 */

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Window identifier assigned by the UI collaborator
pub type WindowId = u64;

/// Per-worker lifecycle state. `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Constructed, SPAWN not yet issued
    Idle,
    /// OS process launching, not yet signaled ready
    Spawning,
    /// Ready and serving messages
    Running,
    /// Running with one or more in-flight window operations
    WindowOperationPending,
    /// Graceful stop in progress
    Stopping,
    /// Exited; terminal
    Stopped,
    /// Failed; terminal
    Error,
}

impl ProcessState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Error)
    }
}

/// UI-bound action temporarily associated with a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOperation {
    Focus,
    Blur,
    Resize,
    Move,
    Show,
    Hide,
}

/// Lifecycle event driving a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Spawn,
    Ready,
    Stop {
        reason: Option<String>,
    },
    ForceStop {
        reason: Option<String>,
    },
    Exit {
        code: Option<i32>,
    },
    Error {
        message: String,
    },
    WindowOpStart {
        window_id: WindowId,
        operation: WindowOperation,
    },
    WindowOpEnd {
        window_id: WindowId,
    },
}

impl ProcessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessEvent::Spawn => "SPAWN",
            ProcessEvent::Ready => "READY",
            ProcessEvent::Stop { .. } => "STOP",
            ProcessEvent::ForceStop { .. } => "FORCE_STOP",
            ProcessEvent::Exit { .. } => "EXIT",
            ProcessEvent::Error { .. } => "ERROR",
            ProcessEvent::WindowOpStart { .. } => "WINDOW_OP_START",
            ProcessEvent::WindowOpEnd { .. } => "WINDOW_OP_END",
        }
    }
}

/// Outcome of a transition attempt. Rejected attempts carry a reason and
/// leave the state unchanged.
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub success: bool,
    pub previous_state: ProcessState,
    pub current_state: ProcessState,
    pub reason: Option<String>,
}

impl TransitionResult {
    pub(crate) fn accepted(previous: ProcessState, current: ProcessState) -> Self {
        Self {
            success: true,
            previous_state: previous,
            current_state: current,
            reason: None,
        }
    }

    pub(crate) fn rejected(state: ProcessState, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            previous_state: state,
            current_state: state,
            reason: Some(reason.into()),
        }
    }
}

/// One successful transition, as kept in the bounded history
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: ProcessState,
    pub to: ProcessState,
    pub event: &'static str,
    pub at: SystemTime,
    /// Time spent in `from` before this transition
    pub dwell: Duration,
}
