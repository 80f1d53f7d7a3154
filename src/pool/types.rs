/*!
 * Pool Types
 * Pooled worker wrapper and pool statistics
 */

use crate::worker::WorkerProcess;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// One idle worker plus its age bookkeeping
pub struct PooledWorker {
    pub worker: Arc<WorkerProcess>,
    pub created_at: Instant,
}

impl PooledWorker {
    pub fn new(worker: Arc<WorkerProcess>) -> Self {
        Self {
            worker,
            created_at: Instant::now(),
        }
    }

    /// Whether the pooled worker has outlived the staleness window
    pub fn is_stale(&self, timeout: std::time::Duration) -> bool {
        self.created_at.elapsed() > timeout
    }
}

/// Pool snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolStats {
    pub size: usize,
    pub ready: usize,
    pub max_size: usize,
    pub min_size: usize,
    pub warming: bool,
}
