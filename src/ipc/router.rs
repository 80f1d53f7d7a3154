/*!
 * IPC Message Router
 * Dispatches inbound worker messages to channel handlers through a
 * middleware chain, with global observers and channel blocking
 */

use super::types::{Channel, Message, ProcessInfo, RouteResult};
use crate::worker::WorkerProcess;
use ahash::{HashMap, HashSet};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Channel handler: terminal stage of the routing chain
pub type HandlerFn = Arc<dyn Fn(&Message, &ProcessInfo) -> RouteResult<()> + Send + Sync>;

/// Global observer: sees every routed message before channel dispatch
pub type GlobalHandlerFn = Arc<dyn Fn(&Message, &ProcessInfo) + Send + Sync>;

/// Middleware stage: must call `next.run(..)` to continue the chain
pub type MiddlewareFn =
    Arc<dyn Fn(&Message, &ProcessInfo, Next<'_>) -> RouteResult<()> + Send + Sync>;

/// Continuation handed to each middleware stage. Middleware compose in
/// registration order: first registered wraps outermost.
pub struct Next<'a> {
    middleware: &'a [MiddlewareFn],
    handler: &'a HandlerFn,
}

impl Next<'_> {
    pub fn run(self, message: &Message, info: &ProcessInfo) -> RouteResult<()> {
        match self.middleware.split_first() {
            Some((stage, rest)) => stage(
                message,
                info,
                Next {
                    middleware: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(message, info),
        }
    }
}

/// Metadata attached to a channel registration
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub description: Option<String>,
    pub priority: i32,
}

struct RegisteredHandler {
    handler: HandlerFn,
    options: HandlerOptions,
}

/// Router debug snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouterDebugInfo {
    pub handler_count: usize,
    pub global_handler_count: usize,
    pub middleware_count: usize,
    pub blocked_channels: Vec<String>,
    pub routed: u64,
    pub rejected: u64,
}

/// IPC message router. All failure is contained here: a throwing handler or
/// middleware fails that one message, never the pump.
pub struct MessageRouter {
    handlers: RwLock<HashMap<Channel, RegisteredHandler>>,
    global_handlers: RwLock<Vec<GlobalHandlerFn>>,
    middleware: RwLock<Vec<MiddlewareFn>>,
    blocked: RwLock<HashSet<Channel>>,
    routed: AtomicU64,
    rejected: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::default()),
            global_handlers: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            blocked: RwLock::new(HashSet::default()),
            routed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Register a handler for a channel. A later registration for the same
    /// channel overwrites the earlier one.
    pub fn register(
        &self,
        channel: Channel,
        handler: impl Fn(&Message, &ProcessInfo) -> RouteResult<()> + Send + Sync + 'static,
    ) {
        self.register_with(channel, handler, HandlerOptions::default());
    }

    pub fn register_with(
        &self,
        channel: Channel,
        handler: impl Fn(&Message, &ProcessInfo) -> RouteResult<()> + Send + Sync + 'static,
        options: HandlerOptions,
    ) {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&channel) {
            warn!("Overwriting existing handler for channel '{}'", channel);
        }
        handlers.insert(
            channel,
            RegisteredHandler {
                handler: Arc::new(handler),
                options,
            },
        );
    }

    pub fn unregister(&self, channel: &Channel) -> bool {
        self.handlers.write().remove(channel).is_some()
    }

    /// Add an observer invoked for every routed message, before channel
    /// dispatch. Observer failures never block dispatch.
    pub fn add_global_handler(&self, handler: impl Fn(&Message, &ProcessInfo) + Send + Sync + 'static) {
        self.global_handlers.write().push(Arc::new(handler));
    }

    /// Append a middleware stage. First registered wraps outermost.
    pub fn use_middleware(
        &self,
        middleware: impl Fn(&Message, &ProcessInfo, Next<'_>) -> RouteResult<()> + Send + Sync + 'static,
    ) {
        self.middleware.write().push(Arc::new(middleware));
    }

    /// Globally suppress a channel
    pub fn block_channel(&self, channel: Channel) {
        debug!("Blocking channel '{}'", channel);
        self.blocked.write().insert(channel);
    }

    pub fn unblock_channel(&self, channel: &Channel) -> bool {
        self.blocked.write().remove(channel)
    }

    pub fn is_blocked(&self, channel: &Channel) -> bool {
        self.blocked.read().contains(channel)
    }

    /// Route one inbound message. Returns `true` only when the full chain ran
    /// to completion.
    pub fn route(&self, message: &Message, info: &ProcessInfo) -> bool {
        if info.prevent_channels.contains(&message.channel) {
            debug!(
                "PID {}: channel '{}' suppressed by process info",
                info.pid, message.channel
            );
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.is_blocked(&message.channel) {
            debug!("Channel '{}' globally blocked", message.channel);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // Global observers run best-effort, before channel dispatch
        let globals: Vec<GlobalHandlerFn> = self.global_handlers.read().iter().cloned().collect();
        for global in globals {
            if catch_unwind(AssertUnwindSafe(|| global(message, info))).is_err() {
                warn!(
                    "Global handler panicked on channel '{}' (PID {})",
                    message.channel, info.pid
                );
            }
        }

        let handler = match self.handlers.read().get(&message.channel) {
            Some(registered) => Arc::clone(&registered.handler),
            None => {
                debug!("No handler registered for channel '{}'", message.channel);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let middleware: Vec<MiddlewareFn> = self.middleware.read().iter().cloned().collect();
        let chain = Next {
            middleware: &middleware,
            handler: &handler,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| chain.run(message, info)));
        match outcome {
            Ok(Ok(())) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(e)) => {
                warn!(
                    "Routing failed on channel '{}' (PID {}): {}",
                    message.channel, info.pid, e
                );
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(_) => {
                warn!(
                    "Routing panicked on channel '{}' (PID {})",
                    message.channel, info.pid
                );
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Send a message to a worker, guarding the OS channel. Returns success.
    pub fn send(
        &self,
        worker: &WorkerProcess,
        channel: Channel,
        value: Option<serde_json::Value>,
        correlation_id: Option<String>,
    ) -> bool {
        if !worker.is_connected() || worker.is_killed() {
            debug!(
                "Send to PID {} dropped: channel unavailable",
                worker.pid()
            );
            return false;
        }
        let mut message = Message::new(channel);
        message.value = value;
        message.correlation_id = correlation_id;
        worker.send(message)
    }

    /// Send to many workers; returns the count of successful sends
    pub fn broadcast(
        &self,
        workers: &[Arc<WorkerProcess>],
        channel: Channel,
        value: Option<serde_json::Value>,
    ) -> usize {
        workers
            .iter()
            .filter(|w| self.send(w, channel.clone(), value.clone(), None))
            .count()
    }

    /// Description/priority metadata for a registered channel, if any
    pub fn handler_options(&self, channel: &Channel) -> Option<HandlerOptions> {
        self.handlers
            .read()
            .get(channel)
            .map(|r| r.options.clone())
    }

    pub fn debug_info(&self) -> RouterDebugInfo {
        RouterDebugInfo {
            handler_count: self.handlers.read().len(),
            global_handler_count: self.global_handlers.read().len(),
            middleware_count: self.middleware.read().len(),
            blocked_channels: self
                .blocked
                .read()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            routed: self.routed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
