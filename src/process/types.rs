/*!
 * Process Types
 * Managed process records and spawn options
 */

use crate::core::types::Pid;
use crate::heartbeat::VisibilityFn;
use crate::ipc::{Channel, ProcessInfo};
use crate::state::ProcessStateMachine;
use crate::worker::{SpawnSpec, WorkerProcess};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// What kind of work a managed process is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// Interactive prompt; eligible for pool acquisition and monitored for
    /// liveness
    Prompt,
    /// One-shot user script
    Script,
    /// Long-lived background worker
    Background,
}

/// Parameters for `ProcessManager::spawn`
#[derive(Clone, Default)]
pub struct SpawnOptions {
    pub process_type: Option<ProcessType>,
    pub script_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub cwd: Option<PathBuf>,
    /// Gates heartbeat pings; hidden prompts are not probed
    pub visibility: Option<VisibilityFn>,
}

impl SpawnOptions {
    pub fn prompt() -> Self {
        Self {
            process_type: Some(ProcessType::Prompt),
            ..Self::default()
        }
    }

    pub fn script(path: impl Into<PathBuf>) -> Self {
        Self {
            process_type: Some(ProcessType::Script),
            script_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn background(path: impl Into<PathBuf>) -> Self {
        Self {
            process_type: Some(ProcessType::Background),
            script_path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: VisibilityFn) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn process_type(&self) -> ProcessType {
        self.process_type.unwrap_or(ProcessType::Script)
    }

    /// Worker-level spawn parameters derived from these options
    pub fn spawn_spec(&self) -> SpawnSpec {
        SpawnSpec {
            script_path: self.script_path.clone(),
            args: self.args.clone(),
            port: self.port,
            cwd: self.cwd.clone(),
        }
    }
}

/// One process under management: the worker handle, its state machine, and
/// routing context
pub struct ManagedProcess {
    pub pid: Pid,
    pub worker: Arc<WorkerProcess>,
    pub machine: Arc<ProcessStateMachine>,
    pub process_type: ProcessType,
    pub script_path: Option<PathBuf>,
    pub started_at: Instant,
    prevent_channels: Arc<RwLock<HashSet<Channel>>>,
    /// Opaque payload from the prompt surface while a prompt window is bound
    /// to this worker
    prompt_binding: RwLock<Option<serde_json::Value>>,
}

impl ManagedProcess {
    pub fn new(
        worker: Arc<WorkerProcess>,
        machine: Arc<ProcessStateMachine>,
        process_type: ProcessType,
        script_path: Option<PathBuf>,
    ) -> Self {
        Self {
            pid: worker.pid(),
            worker,
            machine,
            process_type,
            script_path,
            started_at: Instant::now(),
            prevent_channels: Arc::new(RwLock::new(HashSet::new())),
            prompt_binding: RwLock::new(None),
        }
    }

    /// Routing context snapshot for the router
    pub fn process_info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            prevent_channels: self.prevent_channels.read().clone(),
        }
    }

    pub fn prevent_channel(&self, channel: Channel) {
        self.prevent_channels.write().insert(channel);
    }

    pub fn allow_channel(&self, channel: &Channel) -> bool {
        self.prevent_channels.write().remove(channel)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Attach the prompt surface's context to this worker, replacing any
    /// earlier binding
    pub fn bind_prompt(&self, info: serde_json::Value) {
        *self.prompt_binding.write() = Some(info);
    }

    /// Detach the prompt binding, returning it if one was set
    pub fn unbind_prompt(&self) -> Option<serde_json::Value> {
        self.prompt_binding.write().take()
    }

    pub fn prompt_binding(&self) -> Option<serde_json::Value> {
        self.prompt_binding.read().clone()
    }
}

/// Per-process snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub process_type: ProcessType,
    pub state: crate::state::ProcessState,
    pub script_path: Option<PathBuf>,
    pub uptime_ms: u128,
}

impl ProcessSnapshot {
    pub fn of(process: &ManagedProcess) -> Self {
        Self {
            pid: process.pid,
            process_type: process.process_type,
            state: process.machine.state(),
            script_path: process.script_path.clone(),
            uptime_ms: process.uptime().as_millis(),
        }
    }
}
