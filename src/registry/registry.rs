/*!
 * Disposable Registry
 * Scoped cleanup ledger: tracks cancelable resources keyed by an opaque
 * scope string and disposes them atomically
 *
 * Disposal always completes: each release runs inside its own unwind guard,
 * so one failing disposable never starves the rest of its scope.
 */

use super::disposable::Disposable;
use crate::core::types::Scope;
use crate::worker::WorkerSubscription;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Default)]
struct ScopeEntry {
    disposables: Vec<Disposable>,
    cleanup_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// Registry debug snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryDebugInfo {
    pub scope_count: usize,
    pub total_disposables: usize,
    pub scopes: HashMap<String, usize>,
}

/// Scoped-cleanup registry. One entry per scope; disposing a scope releases
/// every disposable registered under it exactly once, then runs the scope's
/// cleanup callbacks. Repeated disposal is a no-op returning 0.
pub struct DisposableRegistry {
    scopes: Mutex<HashMap<Scope, ScopeEntry>>,
}

impl DisposableRegistry {
    pub fn new() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Register a disposable under a scope
    pub fn register(&self, scope: &str, disposable: Disposable) {
        let mut scopes = self.scopes.lock();
        let entry = scopes.entry(scope.to_string()).or_default();
        debug!(
            "Registered disposable '{}' under scope '{}' ({} total)",
            disposable.label(),
            scope,
            entry.disposables.len() + 1
        );
        entry.disposables.push(disposable);
    }

    /// Register a release closure under a scope
    pub fn register_fn(
        &self,
        scope: &str,
        label: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) {
        self.register(scope, Disposable::new(label, release));
    }

    /// Register a callback that runs after every disposable in the scope has
    /// been released
    pub fn on_scope_dispose(&self, scope: &str, callback: impl FnOnce() + Send + 'static) {
        let mut scopes = self.scopes.lock();
        scopes
            .entry(scope.to_string())
            .or_default()
            .cleanup_callbacks
            .push(Box::new(callback));
    }

    /// Track a spawned task under a scope; the task is aborted on disposal.
    /// Returns the handle so callers can still await or abort it themselves.
    pub fn add_task<T>(
        &self,
        scope: &str,
        label: impl Into<String>,
        handle: JoinHandle<T>,
    ) -> JoinHandle<T> {
        let abort = handle.abort_handle();
        self.register_fn(scope, label, move || abort.abort());
        handle
    }

    /// Track an abort handle under a scope, aborting it on disposal
    pub fn add_abort(&self, scope: &str, label: impl Into<String>, handle: AbortHandle) {
        self.register_fn(scope, label, move || handle.abort());
    }

    /// Track a worker event subscription under a scope, canceling it on
    /// disposal
    pub fn add_subscription(
        &self,
        scope: &str,
        label: impl Into<String>,
        subscription: WorkerSubscription,
    ) {
        self.register(scope, subscription.into_disposable(label));
    }

    /// Dispose a scope: release every disposable exactly once (continuing
    /// past individual failures), then run cleanup callbacks. Returns the
    /// number of disposables released; 0 if the scope was already gone.
    pub fn dispose_scope(&self, scope: &str) -> usize {
        let entry = match self.scopes.lock().remove(scope) {
            Some(entry) => entry,
            None => return 0,
        };

        let count = entry.disposables.len();
        for disposable in entry.disposables {
            let label = disposable.label().to_string();
            if catch_unwind(AssertUnwindSafe(|| disposable.release())).is_err() {
                warn!(
                    "Disposable '{}' in scope '{}' panicked during release",
                    label, scope
                );
            }
        }

        for callback in entry.cleanup_callbacks {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                warn!("Cleanup callback for scope '{}' panicked", scope);
            }
        }

        debug!("Disposed scope '{}' ({} disposables)", scope, count);
        count
    }

    /// Dispose every scope, returning the total disposable count released
    pub fn dispose_all(&self) -> usize {
        let scopes: Vec<Scope> = self.scopes.lock().keys().cloned().collect();
        scopes.iter().map(|s| self.dispose_scope(s)).sum()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.lock().contains_key(scope)
    }

    /// Number of disposables currently registered under a scope
    pub fn scope_size(&self, scope: &str) -> usize {
        self.scopes
            .lock()
            .get(scope)
            .map(|e| e.disposables.len())
            .unwrap_or(0)
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes.lock().keys().cloned().collect()
    }

    pub fn debug_info(&self) -> RegistryDebugInfo {
        let scopes = self.scopes.lock();
        let per_scope: HashMap<String, usize> = scopes
            .iter()
            .map(|(k, v)| (k.clone(), v.disposables.len()))
            .collect();
        RegistryDebugInfo {
            scope_count: per_scope.len(),
            total_disposables: per_scope.values().sum(),
            scopes: per_scope,
        }
    }
}

impl Default for DisposableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience alias for sharing one registry across components
pub type SharedRegistry = Arc<DisposableRegistry>;
