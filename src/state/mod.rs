/*!
 * Process State Machine Module
 * Per-worker lifecycle FSM with a window-operation stop guard
 */

mod machine;
mod types;

pub use machine::{ProcessStateMachine, StateDebugInfo, HISTORY_CAPACITY};
pub use types::{
    ProcessEvent, ProcessState, TransitionRecord, TransitionResult, WindowId, WindowOperation,
};
