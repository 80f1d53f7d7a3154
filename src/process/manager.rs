/*!
 * Process Manager
 * Central orchestrator: spawning, routing, liveness, and teardown
 *
 * Composes the idle pool, per-process state machines, the message router,
 * the heartbeat monitor, and the disposable registry. Every resource bound
 * to a process is registered under its scope, so teardown is one disposal.
 */

use super::types::{ManagedProcess, ProcessSnapshot, ProcessType, SpawnOptions};
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::{process_scope, Pid};
use crate::heartbeat::{HeartbeatDebugInfo, HeartbeatManager};
use crate::ipc::{Channel, Message, MessageRouter, RouterDebugInfo};
use crate::pool::{IdlePool, PoolStats};
use crate::registry::{DisposableRegistry, RegistryDebugInfo, SharedRegistry};
use crate::state::{ProcessEvent, ProcessState, ProcessStateMachine, TransitionResult, WindowId, WindowOperation};
use crate::worker::{WorkerEvent, WorkerFactory};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;

/// Orchestrator debug snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagerDebugInfo {
    pub process_count: usize,
    pub processes: Vec<ProcessSnapshot>,
    pub pool: PoolStats,
    pub heartbeat: HeartbeatDebugInfo,
    pub router: RouterDebugInfo,
    pub registry: RegistryDebugInfo,
}

/// Lightweight handle to one managed process
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Pid,
    manager: ProcessManager,
}

impl ProcessHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> Option<ProcessState> {
        self.manager
            .get_process(self.pid)
            .map(|p| p.machine.state())
    }

    pub fn is_alive(&self) -> bool {
        self.manager
            .get_process(self.pid)
            .map(|p| p.machine.is_alive())
            .unwrap_or(false)
    }

    pub fn send(&self, message: Message) -> bool {
        self.manager.send(self.pid, message)
    }

    pub async fn terminate(&self, reason: Option<String>) -> bool {
        self.manager.terminate(self.pid, reason).await
    }
}

/// Process lifecycle orchestrator. Clone is cheap; all clones share state.
pub struct ProcessManager {
    config: OrchestratorConfig,
    processes: Arc<DashMap<Pid, Arc<ManagedProcess>>>,
    pool: IdlePool,
    heartbeat: HeartbeatManager,
    router: Arc<MessageRouter>,
    registry: SharedRegistry,
    factory: Arc<dyn WorkerFactory>,
}

impl Clone for ProcessManager {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            processes: Arc::clone(&self.processes),
            pool: self.pool.clone(),
            heartbeat: self.heartbeat.clone(),
            router: Arc::clone(&self.router),
            registry: Arc::clone(&self.registry),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl ProcessManager {
    pub fn new(config: OrchestratorConfig, factory: Arc<dyn WorkerFactory>) -> Self {
        let registry: SharedRegistry = Arc::new(DisposableRegistry::new());
        let manager = Self {
            config,
            processes: Arc::new(DashMap::new()),
            pool: IdlePool::new(config.pool, Arc::clone(&factory), Arc::clone(&registry)),
            heartbeat: HeartbeatManager::new(config.heartbeat),
            router: Arc::new(MessageRouter::new()),
            registry,
            factory,
        };

        // Unresponsive workers get force-terminated
        let m = manager.clone();
        manager.heartbeat.on_missed(move |pid, missed| {
            let m = m.clone();
            tokio::spawn(async move {
                m.terminate(
                    pid,
                    Some(format!("unresponsive after {} missed heartbeats", missed)),
                )
                .await;
            });
        });

        manager
    }

    /// Spawn (or adopt from the pool) one worker and begin managing it.
    /// Promptless prompt launches prefer a pre-warmed pooled worker.
    pub fn spawn(&self, options: SpawnOptions) -> ProcessResult<ProcessHandle> {
        let process_type = options.process_type();

        let worker = if process_type == ProcessType::Prompt && options.script_path.is_none() {
            match self.pool.acquire() {
                Some(worker) => worker,
                None => self.factory.create(&options.spawn_spec())?,
            }
        } else {
            self.factory.create(&options.spawn_spec())?
        };

        let pid = worker.pid();
        let machine = Arc::new(ProcessStateMachine::new(pid));
        machine.transition(ProcessEvent::Spawn);

        let process = Arc::new(ManagedProcess::new(
            Arc::clone(&worker),
            Arc::clone(&machine),
            process_type,
            options.script_path.clone(),
        ));
        self.processes.insert(pid, Arc::clone(&process));

        // Pooled workers already signaled ready before acquisition
        if worker.is_ready() {
            machine.transition(ProcessEvent::Ready);
        }

        let scope = process_scope(pid);
        let manager = self.clone();
        let subscription = worker.subscribe(move |event| match event {
            WorkerEvent::Ready => {
                if let Some(p) = manager.get_process(pid) {
                    p.machine.transition(ProcessEvent::Ready);
                }
            }
            WorkerEvent::Message(message) => {
                if message.channel == Channel::Heartbeat {
                    manager.heartbeat.record_response(pid);
                    return;
                }
                if let Some(p) = manager.get_process(pid) {
                    manager.router.route(message, &p.process_info());
                }
            }
            WorkerEvent::Exit(code) => {
                if let Some(p) = manager.get_process(pid) {
                    p.machine.transition(ProcessEvent::Exit { code: *code });
                }
                cleanup(&manager, pid);
            }
            WorkerEvent::Error(message) => {
                if let Some(p) = manager.get_process(pid) {
                    p.machine.transition(ProcessEvent::Error {
                        message: message.clone(),
                    });
                    p.worker.kill();
                }
                cleanup(&manager, pid);
            }
            WorkerEvent::Disconnected => {
                if let Some(p) = manager.get_process(pid) {
                    p.machine.transition(ProcessEvent::Error {
                        message: "message channel disconnected".into(),
                    });
                    p.worker.kill();
                }
                cleanup(&manager, pid);
            }
        });
        self.registry
            .add_subscription(&scope, format!("events-{}", pid), subscription);

        if self.config.monitoring_enabled && process_type == ProcessType::Prompt {
            self.heartbeat
                .register(Arc::clone(&worker), options.visibility.clone());
            let heartbeat = self.heartbeat.clone();
            self.registry
                .register_fn(&scope, format!("heartbeat-{}", pid), move || {
                    heartbeat.unregister(pid);
                });
        }

        info!("Managing {:?} process PID {}", process_type, pid);
        Ok(ProcessHandle {
            pid,
            manager: self.clone(),
        })
    }

    /// Terminate a process: graceful stop when the state machine allows it,
    /// force-stop fallback otherwise, kill escalation on timeout. Returns
    /// `true` once the process is down and cleaned up.
    pub async fn terminate(&self, pid: Pid, reason: Option<String>) -> bool {
        let process = match self.get_process(pid) {
            Some(p) => p,
            None => return false,
        };
        let machine = &process.machine;
        let worker = &process.worker;

        if machine.is_terminal() {
            cleanup(self, pid);
            return true;
        }
        if !machine.can_stop() && !machine.can_force_stop() {
            debug!(
                "Terminate rejected for PID {}: no stop permitted in {:?}",
                pid,
                machine.state()
            );
            return false;
        }

        let stopped = machine
            .transition(ProcessEvent::Stop {
                reason: reason.clone(),
            })
            .success;
        if !stopped {
            // Pending window operations reject STOP; FORCE_STOP clears them
            machine.transition(ProcessEvent::ForceStop { reason });
        }

        // The OS process always gets the graceful signal and a grace window
        // first, whichever transition got us to Stopping
        if worker.signal_terminate() {
            match timeout(self.config.shutdown_timeout, worker.wait_exit()).await {
                Ok(_) => {
                    cleanup(self, pid);
                    return true;
                }
                Err(_) => {
                    warn!(
                        "PID {} ignored termination signal for {:?}, escalating",
                        pid, self.config.shutdown_timeout
                    );
                }
            }
        }

        worker.kill();
        let _ = timeout(self.config.shutdown_timeout, worker.wait_exit()).await;

        cleanup(self, pid);
        true
    }

    /// Terminate every managed process concurrently; returns how many were
    /// actually torn down
    pub async fn terminate_all(&self, reason: Option<String>) -> usize {
        let pids: Vec<Pid> = self.processes.iter().map(|e| *e.key()).collect();
        let results = futures::future::join_all(
            pids.into_iter()
                .map(|pid| self.terminate(pid, reason.clone())),
        )
        .await;
        results.into_iter().filter(|done| *done).count()
    }

    /// Full teardown: all processes, the pool, monitoring, and any remaining
    /// scoped resources
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        let terminated = self.terminate_all(Some("shutdown".into())).await;
        let drained = self.pool.drain();
        self.heartbeat.shutdown();
        let disposed = self.registry.dispose_all();
        info!(
            "Shutdown complete: {} processes terminated, {} pooled workers drained, {} disposables released",
            terminated, drained, disposed
        );
    }

    /// Deliver a message to a process. Dropped (returns `false`) unless the
    /// state machine says the process is ready and the channel is up.
    pub fn send(&self, pid: Pid, message: Message) -> bool {
        match self.get_process(pid) {
            Some(p) if p.machine.is_ready() => p.worker.send(message),
            Some(_) => {
                debug!("Send to PID {} dropped: process not ready", pid);
                false
            }
            None => false,
        }
    }

    /// Mark a window operation in flight for a process
    pub fn window_op_start(
        &self,
        pid: Pid,
        window_id: WindowId,
        operation: WindowOperation,
    ) -> ProcessResult<TransitionResult> {
        let process = self.get_process(pid).ok_or(ProcessError::NotFound(pid))?;
        Ok(process.machine.transition(ProcessEvent::WindowOpStart {
            window_id,
            operation,
        }))
    }

    /// Mark a window operation complete
    pub fn window_op_end(&self, pid: Pid, window_id: WindowId) -> ProcessResult<TransitionResult> {
        let process = self.get_process(pid).ok_or(ProcessError::NotFound(pid))?;
        Ok(process
            .machine
            .transition(ProcessEvent::WindowOpEnd { window_id }))
    }

    /// Suppress a channel for one process regardless of router registration
    pub fn prevent_channel(&self, pid: Pid, channel: Channel) -> ProcessResult<()> {
        let process = self.get_process(pid).ok_or(ProcessError::NotFound(pid))?;
        process.prevent_channel(channel);
        Ok(())
    }

    pub fn allow_channel(&self, pid: Pid, channel: &Channel) -> ProcessResult<bool> {
        let process = self.get_process(pid).ok_or(ProcessError::NotFound(pid))?;
        Ok(process.allow_channel(channel))
    }

    /// Suspend liveness probing (system sleep)
    pub fn pause_monitoring(&self) {
        self.heartbeat.pause();
    }

    /// Resume liveness probing with miss counts reset
    pub fn resume_monitoring(&self) {
        self.heartbeat.resume();
    }

    /// Pre-spawn pooled workers so the next prompt launch is instant
    pub fn warmup_pool(&self, count: usize) -> usize {
        self.pool.warmup(count)
    }

    /// Recycle pooled workers past the staleness window
    pub fn cleanup_stale_pool(&self) -> usize {
        self.pool.cleanup_stale()
    }

    pub fn get_process(&self, pid: Pid) -> Option<Arc<ManagedProcess>> {
        self.processes.get(&pid).map(|e| Arc::clone(e.value()))
    }

    pub fn list_processes(&self) -> Vec<ProcessSnapshot> {
        self.processes
            .iter()
            .map(|e| ProcessSnapshot::of(e.value()))
            .collect()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn heartbeat(&self) -> &HeartbeatManager {
        &self.heartbeat
    }

    pub fn pool(&self) -> &IdlePool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn debug_info(&self) -> ManagerDebugInfo {
        ManagerDebugInfo {
            process_count: self.processes.len(),
            processes: self.list_processes(),
            pool: self.pool.stats(),
            heartbeat: self.heartbeat.debug_info(),
            router: self.router.debug_info(),
            registry: self.registry.debug_info(),
        }
    }
}

/// Release everything bound to a process: monitoring, scoped disposables,
/// and the process record itself. Safe to call repeatedly.
pub fn cleanup(manager: &ProcessManager, pid: Pid) {
    manager.heartbeat.unregister(pid);
    let disposed = manager.registry.dispose_scope(&process_scope(pid));
    if manager.processes.remove(&pid).is_some() {
        debug!("Cleaned up PID {} ({} disposables released)", pid, disposed);
    }
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("processes", &self.processes.len())
            .field("pool", &self.pool)
            .finish()
    }
}
