/*!
 * Heartbeat Manager
 * Liveness probing for worker processes
 *
 * A shared interval task pings every visible monitored worker. A worker
 * silent for longer than the timeout accrues a miss per tick; the missed
 * callbacks fire exactly once, on the tick where the count reaches the
 * threshold. A late response resets the count to zero.
 */

use super::types::{HeartbeatDebugInfo, HeartbeatRecord, MissedCallback, VisibilityFn};
use crate::core::config::HeartbeatConfig;
use crate::core::types::Pid;
use crate::ipc::Message;
use crate::worker::WorkerProcess;
use ahash::HashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Heartbeat monitor. Clone is cheap; all clones share the same records and
/// timer.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    records: Arc<Mutex<HashMap<Pid, HeartbeatRecord>>>,
    callbacks: Arc<Mutex<Vec<MissedCallback>>>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    paused: Arc<AtomicBool>,
}

impl Clone for HeartbeatManager {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            records: Arc::clone(&self.records),
            callbacks: Arc::clone(&self.callbacks),
            timer: Arc::clone(&self.timer),
            paused: Arc::clone(&self.paused),
        }
    }
}

impl HeartbeatManager {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            records: Arc::new(Mutex::new(HashMap::default())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            timer: Arc::new(Mutex::new(None)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a callback for workers crossing the missed threshold
    pub fn on_missed(&self, callback: impl Fn(Pid, u32) + Send + Sync + 'static) {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Start monitoring a worker. The shared interval task starts with the
    /// first registration. Must be called within a tokio runtime.
    pub fn register(&self, worker: Arc<WorkerProcess>, visibility: Option<VisibilityFn>) {
        let pid = worker.pid();
        self.records
            .lock()
            .insert(pid, HeartbeatRecord::new(worker, visibility));
        debug!("Heartbeat monitoring PID {}", pid);
        self.ensure_timer();
    }

    /// Stop monitoring a worker. The interval task stops once nothing is
    /// monitored. Returns `false` if the worker was not registered.
    pub fn unregister(&self, pid: Pid) -> bool {
        let removed = self.records.lock().remove(&pid).is_some();
        if removed {
            debug!("Heartbeat stopped monitoring PID {}", pid);
            self.stop_timer_if_idle();
        }
        removed
    }

    pub fn is_monitored(&self, pid: Pid) -> bool {
        self.records.lock().contains_key(&pid)
    }

    /// Record an inbound heartbeat response, resetting the miss count
    pub fn record_response(&self, pid: Pid) {
        if let Some(record) = self.records.lock().get_mut(&pid) {
            record.last_received = Instant::now();
            record.missed_count = 0;
        }
    }

    /// Suspend probing without losing registrations (system sleep)
    pub fn pause(&self) {
        info!("Heartbeat monitoring paused");
        self.paused.store(true, Ordering::Release);
    }

    /// Resume probing. Miss counts and receive stamps reset so time spent
    /// asleep is never counted against workers.
    pub fn resume(&self) {
        let now = Instant::now();
        for record in self.records.lock().values_mut() {
            record.missed_count = 0;
            record.last_received = now;
        }
        self.paused.store(false, Ordering::Release);
        info!("Heartbeat monitoring resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// One probing pass: ping visible workers, count misses, fire callbacks
    /// for threshold crossings, and drop workers that died.
    pub fn tick(&self) {
        if self.is_paused() {
            return;
        }

        let now = Instant::now();
        let mut dead = Vec::new();
        let mut crossed = Vec::new();
        let mut pings: Vec<Arc<WorkerProcess>> = Vec::new();

        {
            let mut records = self.records.lock();
            for (pid, record) in records.iter_mut() {
                if !record.worker.is_connected() || record.worker.is_killed() {
                    dead.push(*pid);
                    continue;
                }
                if !record.is_visible() {
                    continue;
                }

                if now.duration_since(record.last_received) > self.config.timeout {
                    record.missed_count += 1;
                    debug!(
                        "PID {} missed heartbeat ({}/{})",
                        pid, record.missed_count, self.config.max_missed
                    );
                    if record.missed_count == self.config.max_missed {
                        crossed.push((*pid, record.missed_count));
                    }
                }

                record.last_sent = now;
                pings.push(Arc::clone(&record.worker));
            }
        }

        // Callbacks and sends run outside the records lock; either may call
        // back into the manager
        for worker in pings {
            if !worker.send(Message::heartbeat_ping()) {
                dead.push(worker.pid());
            }
        }

        for (pid, missed) in crossed {
            warn!(
                "PID {} unresponsive after {} missed heartbeats",
                pid, missed
            );
            let callbacks: Vec<MissedCallback> = self.callbacks.lock().clone();
            for callback in callbacks {
                callback(pid, missed);
            }
        }

        for pid in dead {
            self.unregister(pid);
        }
    }

    fn ensure_timer(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let manager = self.clone();
        let interval = self.config.interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                manager.tick();
                if manager.records.lock().is_empty() {
                    break;
                }
            }
            manager.timer.lock().take();
        }));
        debug!("Heartbeat timer started ({:?} interval)", interval);
    }

    fn stop_timer_if_idle(&self) {
        if !self.records.lock().is_empty() {
            return;
        }
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            debug!("Heartbeat timer stopped");
        }
    }

    /// Drop all registrations and stop the timer
    pub fn shutdown(&self) {
        self.records.lock().clear();
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    pub fn debug_info(&self) -> HeartbeatDebugInfo {
        let records = self.records.lock();
        HeartbeatDebugInfo {
            monitored_count: records.len(),
            paused: self.is_paused(),
            missed_counts: records
                .iter()
                .map(|(pid, r)| (*pid, r.missed_count))
                .collect(),
        }
    }
}

impl std::fmt::Debug for HeartbeatManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatManager")
            .field("monitored", &self.records.lock().len())
            .field("paused", &self.is_paused())
            .finish()
    }
}
