/*!
 * Launcher Core
 * Process-lifecycle orchestration for a desktop automation launcher
 *
 * Worker processes run user scripts and interactive prompts; this crate
 * owns their lifecycle: spawning (pool-accelerated for prompts), per-worker
 * state machines guarding lifecycle/window-operation races, IPC message
 * routing, heartbeat liveness monitoring, and scoped resource cleanup.
 *
 * The [`process::ProcessManager`] is the composition root; each subsystem
 * is also usable on its own.
 */

pub mod core;
pub mod heartbeat;
pub mod ipc;
pub mod pool;
pub mod process;
pub mod registry;
pub mod state;
pub mod worker;

pub use crate::core::{OrchestratorConfig, Pid, ProcessError, ProcessResult};
pub use crate::process::{ProcessHandle, ProcessManager, ProcessType, SpawnOptions};
