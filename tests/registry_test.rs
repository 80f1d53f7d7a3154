/*!
 * Disposable Registry Integration Tests
 */

use launcher_core::registry::{Disposable, DisposableRegistry};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_scope_with_two_disposables_and_callback() {
    let registry = DisposableRegistry::new();
    let released = Arc::new(AtomicUsize::new(0));
    let callback_ran = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&released);
    registry.register(
        "process:1",
        Disposable::new("listener", move || {
            r.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let r = Arc::clone(&released);
    registry.register_fn("process:1", "timer", move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&callback_ran);
    registry.on_scope_dispose("process:1", move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(registry.dispose_scope("process:1"), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(callback_ran.load(Ordering::SeqCst), 1);

    // Second disposal is a no-op: nothing released twice
    assert_eq!(registry.dispose_scope("process:1"), 0);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(callback_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scopes_are_independent() {
    let registry = DisposableRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for scope in ["process:1", "process:2"] {
        let l = Arc::clone(&log);
        let scope_owned = scope.to_string();
        registry.register_fn(scope, "res", move || l.lock().push(scope_owned));
    }

    registry.dispose_scope("process:1");
    assert_eq!(*log.lock(), vec!["process:1".to_string()]);
    assert!(registry.has_scope("process:2"));

    registry.dispose_scope("process:2");
    assert_eq!(registry.scopes().len(), 0);
}

#[test]
fn test_panicking_disposable_does_not_starve_scope() {
    let registry = DisposableRegistry::new();
    let survivors = Arc::new(AtomicUsize::new(0));

    registry.register_fn("s", "first-bad", || panic!("boom"));
    for i in 0..3 {
        let s = Arc::clone(&survivors);
        registry.register_fn("s", format!("ok-{}", i), move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(registry.dispose_scope("s"), 4);
    assert_eq!(survivors.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_tracked_task_aborted_on_disposal() {
    let registry = DisposableRegistry::new();

    let handle = registry.add_task(
        "process:9",
        "forever",
        tokio::spawn(async {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
        }),
    );

    registry.dispose_scope("process:9");
    let result = handle.await;
    assert!(result.unwrap_err().is_cancelled());
}
