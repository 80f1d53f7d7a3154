/*!
 * Worker Factory
 * Spawns worker OS processes and wires their message protocol pumps
 *
 * The wire protocol is newline-delimited JSON messages on stdin/stdout;
 * stderr lines are surfaced into the log.
 */

use super::process::WorkerProcess;
use super::types::SpawnSpec;
use crate::core::errors::{ProcessError, ProcessResult};
use crate::ipc::Message;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Creates worker processes. The pool and the process manager both go
/// through this seam, so tests can substitute in-memory workers.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, spec: &SpawnSpec) -> ProcessResult<Arc<WorkerProcess>>;
}

/// Spawns real worker OS processes from a runner command (e.g. the script
/// runtime binary). Must be used within a tokio runtime: the protocol pumps
/// are spawned tasks.
pub struct CommandWorkerFactory {
    program: PathBuf,
    base_args: Vec<String>,
    next_pid: AtomicU32,
}

impl CommandWorkerFactory {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            next_pid: AtomicU32::new(1),
        }
    }

    #[must_use]
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    fn validate(&self, spec: &SpawnSpec) -> ProcessResult<()> {
        if let Some(ref script) = spec.script_path {
            if !script.exists() {
                return Err(ProcessError::EntryPointMissing(
                    script.display().to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl WorkerFactory for CommandWorkerFactory {
    fn create(&self, spec: &SpawnSpec) -> ProcessResult<Arc<WorkerProcess>> {
        self.validate(spec)?;

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        if let Some(ref script) = spec.script_path {
            cmd.arg(script);
        }
        cmd.args(&spec.args);
        if let Some(port) = spec.port {
            cmd.env("WORKER_PORT", port.to_string());
        }
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", self.program.display(), e)))?;

        let os_pid = child
            .id()
            .ok_or_else(|| ProcessError::SpawnFailed("child exited before start".into()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stdout not piped".into()))?;
        let stderr = child.stderr.take();

        let (worker, kill_rx) = WorkerProcess::attached(pid, os_pid);
        info!(
            "Spawned worker PID {} (OS pid {}, script {:?})",
            pid, os_pid, spec.script_path
        );

        // Writer pump: drain the outbound queue into the child's stdin
        let outbound = worker
            .take_outbound()
            .ok_or_else(|| ProcessError::SpawnFailed("outbound channel already taken".into()))?;
        {
            let worker = Arc::clone(&worker);
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Ok(message) = outbound.recv_async().await {
                    let mut line = match serde_json::to_vec(&message) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("PID {}: unserializable message: {}", worker.pid(), e);
                            continue;
                        }
                    };
                    line.push(b'\n');
                    if stdin.write_all(&line).await.is_err() || stdin.flush().await.is_err() {
                        worker.mark_disconnected();
                        break;
                    }
                }
            });
        }

        // Reader pump: parse JSON lines from stdout into protocol messages
        {
            let worker = Arc::clone(&worker);
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Message>(&line) {
                        Ok(message) => worker.push_message(message),
                        Err(e) => {
                            debug!("PID {}: non-protocol stdout line: {}", worker.pid(), e)
                        }
                    }
                }
                worker.mark_disconnected();
            });
        }

        // Stderr pump: worker diagnostics go to the log
        if let Some(stderr) = stderr {
            let pid = worker.pid();
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("PID {} stderr: {}", pid, line);
                }
            });
        }

        // Waiter: reap the child, handling force-kill requests
        {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        status = child.wait() => {
                            match status {
                                Ok(status) => worker.record_exit(status.code()),
                                Err(e) => {
                                    worker.record_error(format!("wait failed: {}", e));
                                    worker.record_exit(None);
                                }
                            }
                            break;
                        }
                        result = kill_rx.recv_async() => {
                            if result.is_ok() {
                                debug!("PID {}: force-killing OS process", worker.pid());
                                let _ = child.start_kill();
                            }
                            // Loop back to collect the exit status
                        }
                    }
                }
            });
        }

        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entry_point_is_fatal() {
        let factory = CommandWorkerFactory::new("/bin/cat");
        let spec = SpawnSpec::for_script("/nonexistent/script.js");
        let result = factory.create(&spec);
        assert!(matches!(result, Err(ProcessError::EntryPointMissing(_))));
    }

    #[tokio::test]
    async fn test_spawn_real_process() {
        // `cat` echoes protocol lines back verbatim
        let factory = CommandWorkerFactory::new("/bin/cat");
        let worker = factory.create(&SpawnSpec::default()).unwrap();
        assert!(worker.os_pid().is_some());
        assert!(worker.is_connected());

        worker.kill();
        let code = worker.wait_exit().await;
        // Killed, so either no code (signal) or a nonzero one
        assert_ne!(code, Some(0));
    }

    #[tokio::test]
    async fn test_entry_point_validated_with_tempfile() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let factory = CommandWorkerFactory::new("/bin/cat");
        let spec = SpawnSpec::for_script(file.path());
        let worker = factory.create(&spec).unwrap();
        worker.kill();
        worker.wait_exit().await;
    }
}
