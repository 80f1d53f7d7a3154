/*!
 * Process Module
 * The orchestrator surface: managed processes and the process manager
 */

mod manager;
mod types;

pub use manager::{cleanup, ManagerDebugInfo, ProcessHandle, ProcessManager};
pub use types::{ManagedProcess, ProcessSnapshot, ProcessType, SpawnOptions};
