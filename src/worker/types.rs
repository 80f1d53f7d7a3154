/*!
 * Worker Types
 * Worker events and spawn parameters
 */

use crate::ipc::Message;
use std::path::PathBuf;

/// Event emitted by a worker process handle
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker signaled the reserved "ready" channel
    Ready,
    /// Any non-reserved inbound message
    Message(Message),
    /// OS process exited with the given code
    Exit(Option<i32>),
    /// Worker-side failure surfaced out-of-band
    Error(String),
    /// The message channel closed without a clean exit
    Disconnected,
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Ready => "ready",
            WorkerEvent::Message(_) => "message",
            WorkerEvent::Exit(_) => "exit",
            WorkerEvent::Error(_) => "error",
            WorkerEvent::Disconnected => "disconnected",
        }
    }
}

/// Parameters for creating one worker OS process
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// User script entry point; validated to exist before spawning
    pub script_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub cwd: Option<PathBuf>,
}

impl SpawnSpec {
    pub fn for_script(path: impl Into<PathBuf>) -> Self {
        Self {
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
}
