/*!
 * Process State Machine
 * One instance per worker; guards invalid lifecycle transitions
 *
 * Destructive lifecycle actions must never race in-flight window operations
 * bound to the same worker: STOP is rejected while any operation is pending,
 * FORCE_STOP bypasses the guard for shutdown-under-timeout.
 */

use super::types::{
    ProcessEvent, ProcessState, TransitionRecord, TransitionResult, WindowId, WindowOperation,
};
use crate::core::types::Pid;
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Most-recent transitions retained per machine
pub const HISTORY_CAPACITY: usize = 50;

type TransitionListener = Arc<dyn Fn(ProcessState, ProcessState, &ProcessEvent) + Send + Sync>;

struct MachineInner {
    state: ProcessState,
    entered_at: Instant,
    pending_ops: HashMap<WindowId, WindowOperation>,
    history: VecDeque<TransitionRecord>,
    last_error: Option<String>,
    exit_code: Option<i32>,
    stop_reason: Option<String>,
}

/// State machine debug snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StateDebugInfo {
    pub pid: Pid,
    pub state: ProcessState,
    pub pending_window_ops: usize,
    pub history_len: usize,
    pub last_error: Option<String>,
    pub exit_code: Option<i32>,
    pub stop_reason: Option<String>,
}

/// Per-worker finite state machine. Transitions are strictly sequential for
/// a given instance (single mutex, no suspension mid-transition).
pub struct ProcessStateMachine {
    pid: Pid,
    inner: Mutex<MachineInner>,
    listeners: Mutex<Vec<(u64, TransitionListener)>>,
    next_listener_id: AtomicU64,
}

impl ProcessStateMachine {
    /// Construct in `Idle` for the given worker
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            inner: Mutex::new(MachineInner {
                state: ProcessState::Idle,
                entered_at: Instant::now(),
                pending_ops: HashMap::new(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                last_error: None,
                exit_code: None,
                stop_reason: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Attempt a transition. Rejections return `success: false` with a
    /// descriptive reason and never mutate state.
    pub fn transition(&self, event: ProcessEvent) -> TransitionResult {
        let mut inner = self.inner.lock();
        let from = inner.state;

        if from.is_terminal() {
            return self.reject(
                &inner,
                &event,
                format!("{} is terminal; {} ignored", state_name(from), event.name()),
            );
        }

        let next = match (from, &event) {
            (ProcessState::Idle, ProcessEvent::Spawn) => ProcessState::Spawning,

            (ProcessState::Spawning, ProcessEvent::Ready) => ProcessState::Running,
            (ProcessState::Spawning, ProcessEvent::Error { .. }) => ProcessState::Error,
            (ProcessState::Spawning, ProcessEvent::Exit { .. }) => ProcessState::Stopped,
            (ProcessState::Spawning, ProcessEvent::ForceStop { .. }) => ProcessState::Stopping,

            (
                ProcessState::Running,
                ProcessEvent::WindowOpStart {
                    window_id,
                    operation,
                },
            ) => {
                inner.pending_ops.insert(*window_id, *operation);
                ProcessState::WindowOperationPending
            }
            (ProcessState::Running, ProcessEvent::Stop { .. })
            | (ProcessState::Running, ProcessEvent::ForceStop { .. }) => ProcessState::Stopping,
            (ProcessState::Running, ProcessEvent::Exit { .. }) => ProcessState::Stopped,
            (ProcessState::Running, ProcessEvent::Error { .. }) => ProcessState::Error,

            (
                ProcessState::WindowOperationPending,
                ProcessEvent::WindowOpStart {
                    window_id,
                    operation,
                },
            ) => {
                // Accumulates; state does not change
                inner.pending_ops.insert(*window_id, *operation);
                ProcessState::WindowOperationPending
            }
            (ProcessState::WindowOperationPending, ProcessEvent::WindowOpEnd { window_id }) => {
                if inner.pending_ops.remove(window_id).is_none() {
                    let reason = format!("window {} has no pending operation", window_id);
                    return self.reject(&inner, &event, reason);
                }
                if inner.pending_ops.is_empty() {
                    ProcessState::Running
                } else {
                    ProcessState::WindowOperationPending
                }
            }
            (ProcessState::WindowOperationPending, ProcessEvent::Stop { .. }) => {
                let reason = format!(
                    "cannot stop: {} window operation(s) pending (use FORCE_STOP)",
                    inner.pending_ops.len()
                );
                return self.reject(&inner, &event, reason);
            }
            (ProcessState::WindowOperationPending, ProcessEvent::ForceStop { .. }) => {
                inner.pending_ops.clear();
                ProcessState::Stopping
            }
            (ProcessState::WindowOperationPending, ProcessEvent::Exit { .. }) => {
                inner.pending_ops.clear();
                ProcessState::Stopped
            }
            (ProcessState::WindowOperationPending, ProcessEvent::Error { .. }) => {
                inner.pending_ops.clear();
                ProcessState::Error
            }

            (ProcessState::Stopping, ProcessEvent::Exit { .. }) => ProcessState::Stopped,
            (ProcessState::Stopping, ProcessEvent::Error { .. }) => ProcessState::Error,

            _ => {
                let reason = format!("{} not valid in {}", event.name(), state_name(from));
                return self.reject(&inner, &event, reason);
            }
        };

        // Derived fields
        match &event {
            ProcessEvent::Exit { code } => inner.exit_code = *code,
            ProcessEvent::Error { message } => inner.last_error = Some(message.clone()),
            ProcessEvent::Stop { reason } | ProcessEvent::ForceStop { reason } => {
                if reason.is_some() {
                    inner.stop_reason = reason.clone();
                }
            }
            _ => {}
        }

        let dwell = inner.entered_at.elapsed();
        if inner.history.len() >= HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(TransitionRecord {
            from,
            to: next,
            event: event.name(),
            at: SystemTime::now(),
            dwell,
        });
        inner.state = next;
        inner.entered_at = Instant::now();
        drop(inner);

        debug!(
            "PID {}: {} [{}] -> {}",
            self.pid,
            state_name(from),
            event.name(),
            state_name(next)
        );

        let listeners: Vec<TransitionListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(from, next, &event);
        }

        TransitionResult::accepted(from, next)
    }

    fn reject(
        &self,
        inner: &MachineInner,
        event: &ProcessEvent,
        reason: String,
    ) -> TransitionResult {
        debug!(
            "PID {}: rejected {} in {}: {}",
            self.pid,
            event.name(),
            state_name(inner.state),
            reason
        );
        TransitionResult::rejected(inner.state, reason)
    }

    /// Subscribe to successful transitions; returns an id for `unsubscribe`
    pub fn subscribe(
        &self,
        listener: impl Fn(ProcessState, ProcessState, &ProcessEvent) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() < before
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    /// True only in `Running`: a graceful stop is currently permitted
    pub fn can_stop(&self) -> bool {
        self.inner.lock().state == ProcessState::Running
    }

    /// True unless the machine is `Idle` or terminal
    pub fn can_force_stop(&self) -> bool {
        let state = self.inner.lock().state;
        state != ProcessState::Idle && !state.is_terminal()
    }

    /// Messages may still be delivered during pending window operations
    pub fn is_ready(&self) -> bool {
        matches!(
            self.inner.lock().state,
            ProcessState::Running | ProcessState::WindowOperationPending
        )
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self.inner.lock().state,
            ProcessState::Spawning
                | ProcessState::Running
                | ProcessState::WindowOperationPending
                | ProcessState::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.lock().state.is_terminal()
    }

    pub fn pending_window_ops(&self) -> HashMap<WindowId, WindowOperation> {
        self.inner.lock().pending_ops.clone()
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.lock().exit_code
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.inner.lock().stop_reason.clone()
    }

    pub fn debug_info(&self) -> StateDebugInfo {
        let inner = self.inner.lock();
        StateDebugInfo {
            pid: self.pid,
            state: inner.state,
            pending_window_ops: inner.pending_ops.len(),
            history_len: inner.history.len(),
            last_error: inner.last_error.clone(),
            exit_code: inner.exit_code,
            stop_reason: inner.stop_reason.clone(),
        }
    }
}

fn state_name(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Idle => "Idle",
        ProcessState::Spawning => "Spawning",
        ProcessState::Running => "Running",
        ProcessState::WindowOperationPending => "WindowOperationPending",
        ProcessState::Stopping => "Stopping",
        ProcessState::Stopped => "Stopped",
        ProcessState::Error => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn machine() -> ProcessStateMachine {
        ProcessStateMachine::new(1)
    }

    fn running() -> ProcessStateMachine {
        let m = machine();
        assert!(m.transition(ProcessEvent::Spawn).success);
        assert!(m.transition(ProcessEvent::Ready).success);
        m
    }

    #[test]
    fn test_happy_path() {
        let m = running();
        assert_eq!(m.state(), ProcessState::Running);
        assert!(m.transition(ProcessEvent::Stop { reason: None }).success);
        assert!(m.transition(ProcessEvent::Exit { code: Some(0) }).success);
        assert_eq!(m.state(), ProcessState::Stopped);
        assert_eq!(m.exit_code(), Some(0));
    }

    #[test]
    fn test_idle_rejects_everything_but_spawn() {
        let m = machine();
        assert!(!m.transition(ProcessEvent::Ready).success);
        assert!(!m.transition(ProcessEvent::Stop { reason: None }).success);
        assert!(
            !m.transition(ProcessEvent::ForceStop { reason: None })
                .success
        );
        assert_eq!(m.state(), ProcessState::Idle);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let m = running();
        m.transition(ProcessEvent::Exit { code: Some(1) });
        assert_eq!(m.state(), ProcessState::Stopped);

        let result = m.transition(ProcessEvent::Spawn);
        assert!(!result.success);
        assert!(result.reason.unwrap().contains("terminal"));
        assert_eq!(m.state(), ProcessState::Stopped);
    }

    #[test]
    fn test_stop_rejected_while_window_op_pending() {
        let m = running();
        assert!(
            m.transition(ProcessEvent::WindowOpStart {
                window_id: 5,
                operation: WindowOperation::Resize,
            })
            .success
        );
        assert_eq!(m.state(), ProcessState::WindowOperationPending);
        assert!(m.can_force_stop());
        assert!(!m.can_stop());

        let result = m.transition(ProcessEvent::Stop { reason: None });
        assert!(!result.success);
        assert!(result.reason.unwrap().contains("pending"));

        assert!(
            m.transition(ProcessEvent::WindowOpEnd { window_id: 5 })
                .success
        );
        assert_eq!(m.state(), ProcessState::Running);
        assert!(m.transition(ProcessEvent::Stop { reason: None }).success);
    }

    #[test]
    fn test_force_stop_clears_pending_ops() {
        let m = running();
        m.transition(ProcessEvent::WindowOpStart {
            window_id: 1,
            operation: WindowOperation::Focus,
        });
        m.transition(ProcessEvent::WindowOpStart {
            window_id: 2,
            operation: WindowOperation::Move,
        });
        assert_eq!(m.pending_window_ops().len(), 2);

        assert!(
            m.transition(ProcessEvent::ForceStop {
                reason: Some("shutdown".into()),
            })
            .success
        );
        assert_eq!(m.state(), ProcessState::Stopping);
        assert!(m.pending_window_ops().is_empty());
        assert_eq!(m.stop_reason(), Some("shutdown".into()));
    }

    #[test]
    fn test_window_op_accumulation_and_drain() {
        let m = running();
        for id in 0..3u64 {
            m.transition(ProcessEvent::WindowOpStart {
                window_id: id,
                operation: WindowOperation::Show,
            });
        }
        assert_eq!(m.pending_window_ops().len(), 3);

        m.transition(ProcessEvent::WindowOpEnd { window_id: 0 });
        m.transition(ProcessEvent::WindowOpEnd { window_id: 1 });
        assert_eq!(m.state(), ProcessState::WindowOperationPending);
        m.transition(ProcessEvent::WindowOpEnd { window_id: 2 });
        assert_eq!(m.state(), ProcessState::Running);
    }

    #[test]
    fn test_unknown_window_op_end_rejected() {
        let m = running();
        m.transition(ProcessEvent::WindowOpStart {
            window_id: 7,
            operation: WindowOperation::Hide,
        });
        let result = m.transition(ProcessEvent::WindowOpEnd { window_id: 99 });
        assert!(!result.success);
        assert_eq!(m.state(), ProcessState::WindowOperationPending);
    }

    #[test]
    fn test_unexpected_exit_clears_pending_ops() {
        let m = running();
        m.transition(ProcessEvent::WindowOpStart {
            window_id: 1,
            operation: WindowOperation::Focus,
        });
        assert!(m.transition(ProcessEvent::Exit { code: None }).success);
        assert_eq!(m.state(), ProcessState::Stopped);
        assert!(m.pending_window_ops().is_empty());
    }

    #[test]
    fn test_error_records_message() {
        let m = running();
        m.transition(ProcessEvent::Error {
            message: "worker crashed".into(),
        });
        assert_eq!(m.state(), ProcessState::Error);
        assert_eq!(m.last_error(), Some("worker crashed".into()));
        assert!(m.is_terminal());
        assert!(!m.is_alive());
    }

    #[test]
    fn test_listeners_fire_only_on_success() {
        let m = machine();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        m.subscribe(move |_, _, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        m.transition(ProcessEvent::Ready); // rejected in Idle
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        m.transition(ProcessEvent::Spawn);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let m = machine();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let id = m.subscribe(move |_, _, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(m.unsubscribe(id));
        m.transition(ProcessEvent::Spawn);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_history_bounded() {
        let m = running();
        // Bounce between WindowOperationPending and Running far past capacity
        for i in 0..60u64 {
            m.transition(ProcessEvent::WindowOpStart {
                window_id: i,
                operation: WindowOperation::Focus,
            });
            m.transition(ProcessEvent::WindowOpEnd { window_id: i });
        }
        let history = m.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        // Most recent entry is the final WINDOW_OP_END back to Running
        assert_eq!(history.last().unwrap().to, ProcessState::Running);
    }

    #[test]
    fn test_stopping_ignores_stray_events() {
        let m = running();
        m.transition(ProcessEvent::Stop { reason: None });
        assert!(!m.transition(ProcessEvent::Ready).success);
        assert!(!m.transition(ProcessEvent::Stop { reason: None }).success);
        assert_eq!(m.state(), ProcessState::Stopping);
        assert!(m.transition(ProcessEvent::Exit { code: Some(0) }).success);
    }
}
