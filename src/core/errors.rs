/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use crate::core::types::Pid;
use thiserror::Error;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Process {0} not found")]
    NotFound(Pid),

    #[error("Entry point missing: {0}")]
    EntryPointMissing(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
}
