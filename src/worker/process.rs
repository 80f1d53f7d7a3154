/*!
 * Worker Process Handle
 * Shared handle to one worker OS process and its message channel
 *
 * The inbound surface (`push_message`, `record_exit`, `mark_disconnected`)
 * is transport-agnostic: the stdio pumps feed it for real children, and
 * detached workers let embedders or tests feed it directly.
 */

use super::types::WorkerEvent;
use crate::core::types::Pid;
use crate::ipc::{Channel, Message};
use crate::registry::Disposable;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

type EventListener = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;

/// Handle returned by `WorkerProcess::subscribe`; cancel to stop receiving
/// events, or convert into a registry disposable for scoped cleanup.
pub struct WorkerSubscription {
    id: u64,
    worker: Weak<WorkerProcess>,
}

impl WorkerSubscription {
    pub fn cancel(self) {
        if let Some(worker) = self.worker.upgrade() {
            worker.unsubscribe(self.id);
        }
    }

    /// Wrap as a disposable labeled for the registry
    pub fn into_disposable(self, label: impl Into<String>) -> Disposable {
        Disposable::new(label, move || self.cancel())
    }
}

/// Shared handle to one worker process. Cheap to clone via `Arc`; all state
/// is interior.
pub struct WorkerProcess {
    pid: Pid,
    os_pid: Option<u32>,
    connected: AtomicBool,
    killed: AtomicBool,
    ready: AtomicBool,
    outbound_tx: flume::Sender<Message>,
    /// Held until `take_outbound`; the stdio writer pump takes it for real
    /// children, embedders take it for detached workers
    outbound_rx: Mutex<Option<flume::Receiver<Message>>>,
    kill_tx: Mutex<Option<flume::Sender<()>>>,
    /// `Some(exit_code)` once the process has exited
    exit_state: Mutex<Option<Option<i32>>>,
    exit_notify: Notify,
    listeners: Mutex<Vec<(u64, EventListener)>>,
    next_listener_id: AtomicU64,
}

impl WorkerProcess {
    /// Create a handle backed by a real OS child. The factory wires the
    /// returned kill sender into the child's waiter task.
    pub(crate) fn attached(pid: Pid, os_pid: u32) -> (Arc<Self>, flume::Receiver<()>) {
        let (kill_tx, kill_rx) = flume::bounded(1);
        let worker = Self::build(pid, Some(os_pid), Some(kill_tx));
        (Arc::new(worker), kill_rx)
    }

    /// Create an in-memory worker with no OS child. Sends are observable via
    /// `take_outbound`; inbound traffic is fed through `push_message`.
    pub fn detached(pid: Pid) -> Arc<Self> {
        Arc::new(Self::build(pid, None, None))
    }

    fn build(pid: Pid, os_pid: Option<u32>, kill_tx: Option<flume::Sender<()>>) -> Self {
        let (outbound_tx, outbound_rx) = flume::unbounded();
        Self {
            pid,
            os_pid,
            connected: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            kill_tx: Mutex::new(kill_tx),
            exit_state: Mutex::new(None),
            exit_notify: Notify::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn os_pid(&self) -> Option<u32> {
        self.os_pid
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// True once the worker has signaled the reserved "ready" channel
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Subscribe to worker events; the listener fires synchronously in
    /// arrival order for a given worker
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&WorkerEvent) + Send + Sync + 'static,
    ) -> WorkerSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        WorkerSubscription {
            id,
            worker: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    fn emit(&self, event: &WorkerEvent) {
        // Snapshot so listeners may unsubscribe (or dispose scopes) mid-event
        let listeners: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Queue a message for the worker. Returns `false` when the channel is
    /// closed, the worker is killed, or it has disconnected.
    pub fn send(&self, message: Message) -> bool {
        if !self.is_connected() || self.is_killed() {
            return false;
        }
        self.outbound_tx.send(message).is_ok()
    }

    /// Take the outbound receiver. The stdio writer pump takes it for real
    /// children; for detached workers the embedder drains it.
    pub fn take_outbound(&self) -> Option<flume::Receiver<Message>> {
        self.outbound_rx.lock().take()
    }

    /// Feed one inbound protocol message. The reserved "ready" channel flips
    /// the ready flag; everything else is emitted as a message event.
    pub fn push_message(&self, message: Message) {
        if message.channel == Channel::Ready {
            if !self.ready.swap(true, Ordering::AcqRel) {
                debug!("PID {}: worker signaled ready", self.pid);
                self.emit(&WorkerEvent::Ready);
            }
            return;
        }
        self.emit(&WorkerEvent::Message(message));
    }

    /// Surface a worker-side failure
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("PID {}: worker error: {}", self.pid, message);
        self.emit(&WorkerEvent::Error(message));
    }

    /// Record process exit. Idempotent; the first call emits the exit event
    /// and wakes `wait_exit` callers.
    pub fn record_exit(&self, code: Option<i32>) {
        {
            let mut exit = self.exit_state.lock();
            if exit.is_some() {
                return;
            }
            *exit = Some(code);
        }
        self.connected.store(false, Ordering::Release);
        debug!("PID {}: exited with code {:?}", self.pid, code);
        self.exit_notify.notify_waiters();
        self.emit(&WorkerEvent::Exit(code));
    }

    /// Record loss of the message channel without a clean exit. Idempotent
    /// once the worker has exited.
    pub fn mark_disconnected(&self) {
        if self.exit_state.lock().is_some() {
            return;
        }
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("PID {}: message channel disconnected", self.pid);
            self.emit(&WorkerEvent::Disconnected);
        }
    }

    /// Ask the OS process to terminate gracefully (SIGTERM). Returns `false`
    /// when there is no OS process to signal.
    pub fn signal_terminate(&self) -> bool {
        #[cfg(unix)]
        if let Some(os_pid) = self.os_pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid as NixPid;
            match kill(NixPid::from_raw(os_pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    debug!("PID {}: SIGTERM sent to OS pid {}", self.pid, os_pid);
                    return true;
                }
                Err(e) => {
                    warn!("PID {}: SIGTERM failed for OS pid {}: {}", self.pid, os_pid, e);
                    return false;
                }
            }
        }
        false
    }

    /// Forcefully kill the worker. For a real child this reaches the waiter
    /// task, which reports the final exit; a detached worker exits inline.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        let kill_tx = self.kill_tx.lock().clone();
        match kill_tx {
            Some(tx) => {
                let _ = tx.try_send(());
            }
            None => {
                // No OS child to reap
                self.record_exit(None);
            }
        }
    }

    /// Exit code once the process has exited, `None` while it is running
    pub fn exit_code(&self) -> Option<Option<i32>> {
        *self.exit_state.lock()
    }

    /// Wait until the process has exited, returning its exit code
    pub async fn wait_exit(&self) -> Option<i32> {
        loop {
            let notified = self.exit_notify.notified();
            if let Some(code) = *self.exit_state.lock() {
                return code;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid)
            .field("os_pid", &self.os_pid)
            .field("connected", &self.is_connected())
            .field("killed", &self.is_killed())
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ready_signal_flips_flag_once() {
        let worker = WorkerProcess::detached(1);
        let readies = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&readies);
        let _sub = worker.subscribe(move |event| {
            if matches!(event, WorkerEvent::Ready) {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(!worker.is_ready());
        worker.push_message(Message::new(Channel::Ready));
        worker.push_message(Message::new(Channel::Ready));
        assert!(worker.is_ready());
        assert_eq!(readies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_guards_after_kill() {
        let worker = WorkerProcess::detached(2);
        assert!(worker.send(Message::new(Channel::Log)));
        worker.kill();
        assert!(worker.is_killed());
        assert!(!worker.send(Message::new(Channel::Log)));
    }

    #[test]
    fn test_detached_kill_records_exit() {
        let worker = WorkerProcess::detached(3);
        worker.kill();
        assert!(!worker.is_connected());
        assert_eq!(worker.exit_code(), Some(None));
    }

    #[test]
    fn test_exit_emitted_once() {
        let worker = WorkerProcess::detached(4);
        let exits = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&exits);
        let _sub = worker.subscribe(move |event| {
            if matches!(event, WorkerEvent::Exit(_)) {
                e.fetch_add(1, Ordering::SeqCst);
            }
        });

        worker.record_exit(Some(0));
        worker.record_exit(Some(1));
        worker.mark_disconnected(); // ignored after exit
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert_eq!(worker.exit_code(), Some(Some(0)));
    }

    #[test]
    fn test_subscription_cancel() {
        let worker = WorkerProcess::detached(5);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let sub = worker.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        sub.cancel();
        worker.push_message(Message::new(Channel::Log));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outbound_observable_on_detached() {
        let worker = WorkerProcess::detached(6);
        let rx = worker.take_outbound().unwrap();
        assert!(worker.send(Message::new(Channel::Prompt)));
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.channel, Channel::Prompt);
    }

    #[tokio::test]
    async fn test_wait_exit_resolves() {
        let worker = WorkerProcess::detached(7);
        let waiter = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.wait_exit().await })
        };
        worker.record_exit(Some(3));
        assert_eq!(waiter.await.unwrap(), Some(3));
    }
}
