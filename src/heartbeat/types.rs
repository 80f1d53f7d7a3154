/*!
 * Heartbeat Types
 * Per-worker liveness bookkeeping
 */

use crate::worker::WorkerProcess;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Predicate gating pings; hidden windows are not probed
pub type VisibilityFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Callback invoked when a worker crosses the missed-heartbeat threshold
pub type MissedCallback = Arc<dyn Fn(crate::core::types::Pid, u32) + Send + Sync>;

/// Liveness record for one monitored worker
pub struct HeartbeatRecord {
    pub worker: Arc<WorkerProcess>,
    pub last_sent: Instant,
    pub last_received: Instant,
    pub missed_count: u32,
    pub visibility: Option<VisibilityFn>,
}

impl HeartbeatRecord {
    pub fn new(worker: Arc<WorkerProcess>, visibility: Option<VisibilityFn>) -> Self {
        let now = Instant::now();
        Self {
            worker,
            last_sent: now,
            last_received: now,
            missed_count: 0,
            visibility,
        }
    }

    /// Whether this worker should be probed right now
    pub fn is_visible(&self) -> bool {
        self.visibility.as_ref().map(|f| f()).unwrap_or(true)
    }
}

/// Heartbeat manager snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatDebugInfo {
    pub monitored_count: usize,
    pub paused: bool,
    pub missed_counts: HashMap<u32, u32>,
}
