/*!
 * State Machine Integration Tests
 * Full lifecycle sequences across spawn, window operations, and teardown
 */

use launcher_core::state::{
    ProcessEvent, ProcessState, ProcessStateMachine, WindowOperation,
};
use pretty_assertions::assert_eq;

/// SPAWN -> READY -> WINDOW_OP_START -> STOP (rejected) -> WINDOW_OP_END ->
/// STOP -> EXIT, asserting the state after each step
#[test]
fn test_window_operation_guards_graceful_stop() {
    let m = ProcessStateMachine::new(7);

    assert!(m.transition(ProcessEvent::Spawn).success);
    assert_eq!(m.state(), ProcessState::Spawning);

    assert!(m.transition(ProcessEvent::Ready).success);
    assert_eq!(m.state(), ProcessState::Running);

    assert!(
        m.transition(ProcessEvent::WindowOpStart {
            window_id: 42,
            operation: WindowOperation::Resize,
        })
        .success
    );
    assert_eq!(m.state(), ProcessState::WindowOperationPending);

    let rejected = m.transition(ProcessEvent::Stop { reason: None });
    assert!(!rejected.success);
    assert_eq!(rejected.current_state, ProcessState::WindowOperationPending);
    assert_eq!(m.state(), ProcessState::WindowOperationPending);

    assert!(
        m.transition(ProcessEvent::WindowOpEnd { window_id: 42 })
            .success
    );
    assert_eq!(m.state(), ProcessState::Running);

    assert!(
        m.transition(ProcessEvent::Stop {
            reason: Some("user closed".into()),
        })
        .success
    );
    assert_eq!(m.state(), ProcessState::Stopping);

    assert!(m.transition(ProcessEvent::Exit { code: Some(0) }).success);
    assert_eq!(m.state(), ProcessState::Stopped);
    assert_eq!(m.exit_code(), Some(0));
    assert_eq!(m.stop_reason(), Some("user closed".into()));
}

#[test]
fn test_history_records_rejections_nowhere_and_successes_in_order() {
    let m = ProcessStateMachine::new(1);
    m.transition(ProcessEvent::Ready); // rejected in Idle
    m.transition(ProcessEvent::Spawn);
    m.transition(ProcessEvent::Ready);

    let history = m.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from, ProcessState::Idle);
    assert_eq!(history[0].to, ProcessState::Spawning);
    assert_eq!(history[1].from, ProcessState::Spawning);
    assert_eq!(history[1].to, ProcessState::Running);
}

#[test]
fn test_crash_during_window_operation() {
    let m = ProcessStateMachine::new(2);
    m.transition(ProcessEvent::Spawn);
    m.transition(ProcessEvent::Ready);
    m.transition(ProcessEvent::WindowOpStart {
        window_id: 1,
        operation: WindowOperation::Focus,
    });

    // Worker dies mid-operation; pending set must not leak
    assert!(m.transition(ProcessEvent::Exit { code: None }).success);
    assert_eq!(m.state(), ProcessState::Stopped);
    assert!(m.pending_window_ops().is_empty());
    assert!(m.is_terminal());
}

#[test]
fn test_spawn_failure_goes_to_error() {
    let m = ProcessStateMachine::new(3);
    m.transition(ProcessEvent::Spawn);
    m.transition(ProcessEvent::Error {
        message: "runtime binary not found".into(),
    });

    assert_eq!(m.state(), ProcessState::Error);
    assert_eq!(m.last_error(), Some("runtime binary not found".into()));
    assert!(!m.transition(ProcessEvent::Spawn).success);
}
