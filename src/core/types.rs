/*!
 * Core Types
 * Common types shared across the orchestration core
 */

/// Process ID type (orchestrator-allocated, not the OS pid)
pub type Pid = u32;

/// Opaque cleanup-grouping key, typically one per worker process
pub type Scope = String;

/// Scope key for a managed worker process
#[inline]
#[must_use]
pub fn process_scope(pid: Pid) -> Scope {
    format!("process:{}", pid)
}

/// Scope key for a worker while it sits in the idle pool
#[inline]
#[must_use]
pub fn pool_scope(pid: Pid) -> Scope {
    format!("pool:{}", pid)
}
