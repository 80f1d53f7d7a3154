/*!
 * Core Module
 * Shared types, errors, and configuration
 */

pub mod config;
pub mod errors;
pub mod types;

pub use config::{HeartbeatConfig, OrchestratorConfig, PoolConfig};
pub use errors::{ProcessError, ProcessResult};
pub use types::{pool_scope, process_scope, Pid, Scope};
