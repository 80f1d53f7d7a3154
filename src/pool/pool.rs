/*!
 * Idle Worker Pool
 * Pre-warmed workers that make prompt launches feel instant
 *
 * Acquisition only ever hands out workers that have signaled ready and are
 * still connected; anything else stays pooled until it either readies up or
 * dies and gets evicted by its event subscription.
 */

use super::types::{PoolStats, PooledWorker};
use crate::core::config::PoolConfig;
use crate::core::types::{pool_scope, Pid};
use crate::registry::SharedRegistry;
use crate::worker::{SpawnSpec, WorkerEvent, WorkerFactory, WorkerProcess};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pool of idle, pre-spawned workers. Clone is cheap; all clones share the
/// same pool state.
pub struct IdlePool {
    config: PoolConfig,
    workers: Arc<Mutex<Vec<PooledWorker>>>,
    factory: Arc<dyn WorkerFactory>,
    registry: SharedRegistry,
    /// Single-flight guard for the async refill after acquisition
    warming: Arc<AtomicBool>,
}

impl Clone for IdlePool {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            workers: Arc::clone(&self.workers),
            factory: Arc::clone(&self.factory),
            registry: Arc::clone(&self.registry),
            warming: Arc::clone(&self.warming),
        }
    }
}

impl IdlePool {
    pub fn new(config: PoolConfig, factory: Arc<dyn WorkerFactory>, registry: SharedRegistry) -> Self {
        Self {
            config,
            workers: Arc::new(Mutex::new(Vec::new())),
            factory,
            registry,
            warming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a worker to the pool. Rejected (returns `false`) at capacity or if
    /// the worker is already dead. Pooled workers are evicted automatically
    /// when they exit, error, or disconnect.
    pub fn add(&self, worker: Arc<WorkerProcess>) -> bool {
        if !worker.is_connected() || worker.is_killed() {
            debug!("Pool rejecting dead worker PID {}", worker.pid());
            return false;
        }

        {
            let mut workers = self.workers.lock();
            if workers.len() >= self.config.max_size {
                debug!(
                    "Pool at capacity ({}), rejecting worker PID {}",
                    self.config.max_size,
                    worker.pid()
                );
                return false;
            }
            workers.push(PooledWorker::new(Arc::clone(&worker)));
        }

        // Evict on death so acquire never sees a corpse
        let pid = worker.pid();
        let pool_workers = Arc::clone(&self.workers);
        let subscription = worker.subscribe(move |event| {
            if matches!(
                event,
                WorkerEvent::Exit(_) | WorkerEvent::Error(_) | WorkerEvent::Disconnected
            ) {
                let mut workers = pool_workers.lock();
                if let Some(idx) = workers.iter().position(|p| p.worker.pid() == pid) {
                    warn!("Evicting pooled worker PID {} after {}", pid, event.name());
                    workers.remove(idx);
                }
            }
        });
        self.registry
            .add_subscription(&pool_scope(pid), format!("pool-watch-{}", pid), subscription);

        debug!("Pooled worker PID {} ({} idle)", pid, self.size());
        true
    }

    /// Take one ready worker from the pool, or `None` when none is usable.
    /// Falling below the minimum triggers a background refill.
    pub fn acquire(&self) -> Option<Arc<WorkerProcess>> {
        let acquired = {
            let mut workers = self.workers.lock();
            let idx = workers
                .iter()
                .position(|p| p.worker.is_ready() && p.worker.is_connected() && !p.worker.is_killed())?;
            workers.remove(idx).worker
        };

        // The pool's watch is done; ownership moves to the caller
        self.registry.dispose_scope(&pool_scope(acquired.pid()));
        info!("Acquired pooled worker PID {}", acquired.pid());

        if self.size() < self.config.min_size {
            self.refill();
        }

        Some(acquired)
    }

    /// Spawn workers until the pool holds `count`, stopping at capacity or on
    /// the first spawn failure. Returns the number actually added.
    pub fn warmup(&self, count: usize) -> usize {
        let target = count.min(self.config.max_size);
        let mut added = 0;
        while self.size() < target {
            match self.factory.create(&SpawnSpec::default()) {
                Ok(worker) => {
                    if !self.add(Arc::clone(&worker)) {
                        // Lost the capacity race; the fresh worker has no
                        // owner, so it must not outlive the rejection
                        worker.kill();
                        break;
                    }
                    added += 1;
                }
                Err(e) => {
                    warn!("Pool warmup spawn failed: {}", e);
                    break;
                }
            }
        }
        if added > 0 {
            info!("Pool warmed up {} workers ({} idle)", added, self.size());
        }
        added
    }

    /// Background refill to `min_size`; single-flight so concurrent acquires
    /// trigger at most one warmup task
    fn refill(&self) {
        if self
            .warming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            pool.warmup(pool.config.min_size);
            pool.warming.store(false, Ordering::Release);
        });
    }

    /// Kill and evict pooled workers older than the staleness window, along
    /// with any that died without being noticed. Returns the number recycled.
    pub fn cleanup_stale(&self) -> usize {
        let stale: Vec<Arc<WorkerProcess>> = {
            let mut workers = self.workers.lock();
            let mut removed = Vec::new();
            workers.retain(|p| {
                if p.is_stale(self.config.stale_timeout)
                    || !p.worker.is_connected()
                    || p.worker.is_killed()
                {
                    removed.push(Arc::clone(&p.worker));
                    false
                } else {
                    true
                }
            });
            removed
        };

        for worker in &stale {
            debug!("Recycling stale pooled worker PID {}", worker.pid());
            self.registry.dispose_scope(&pool_scope(worker.pid()));
            worker.kill();
        }
        stale.len()
    }

    /// Kill every pooled worker and empty the pool. Returns the number drained.
    pub fn drain(&self) -> usize {
        let drained: Vec<Arc<WorkerProcess>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).map(|p| p.worker).collect()
        };

        for worker in &drained {
            self.registry.dispose_scope(&pool_scope(worker.pid()));
            worker.kill();
        }
        if !drained.is_empty() {
            info!("Drained {} pooled workers", drained.len());
        }
        drained.len()
    }

    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.workers.lock().iter().map(|p| p.worker.pid()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let workers = self.workers.lock();
        PoolStats {
            size: workers.len(),
            ready: workers.iter().filter(|p| p.worker.is_ready()).count(),
            max_size: self.config.max_size,
            min_size: self.config.min_size,
            warming: self.warming.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for IdlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdlePool")
            .field("size", &self.size())
            .field("max_size", &self.config.max_size)
            .field("min_size", &self.config.min_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ProcessResult;
    use crate::ipc::{Channel, Message};
    use crate::registry::DisposableRegistry;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct DetachedFactory {
        next_pid: AtomicU32,
    }

    impl DetachedFactory {
        fn new() -> Self {
            Self {
                next_pid: AtomicU32::new(100),
            }
        }
    }

    impl WorkerFactory for DetachedFactory {
        fn create(&self, _spec: &SpawnSpec) -> ProcessResult<Arc<WorkerProcess>> {
            Ok(WorkerProcess::detached(
                self.next_pid.fetch_add(1, Ordering::SeqCst),
            ))
        }
    }

    fn make_pool(config: PoolConfig) -> IdlePool {
        IdlePool::new(
            config,
            Arc::new(DetachedFactory::new()),
            Arc::new(DisposableRegistry::new()),
        )
    }

    fn ready_worker(pid: Pid) -> Arc<WorkerProcess> {
        let worker = WorkerProcess::detached(pid);
        worker.push_message(Message::new(Channel::Ready));
        worker
    }

    #[test]
    fn test_acquire_skips_unready_workers() {
        let pool = make_pool(PoolConfig {
            max_size: 3,
            min_size: 0,
            stale_timeout: Duration::from_secs(30),
        });

        assert!(pool.add(WorkerProcess::detached(1)));
        assert!(pool.add(WorkerProcess::detached(2)));
        assert!(pool.acquire().is_none());
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_acquire_returns_ready_worker_and_shrinks() {
        let pool = make_pool(PoolConfig {
            max_size: 3,
            min_size: 0,
            stale_timeout: Duration::from_secs(30),
        });

        pool.add(WorkerProcess::detached(1));
        pool.add(ready_worker(2));
        pool.add(WorkerProcess::detached(3));

        let acquired = pool.acquire().unwrap();
        assert_eq!(acquired.pid(), 2);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_add_rejected_at_capacity() {
        let pool = make_pool(PoolConfig {
            max_size: 2,
            min_size: 0,
            stale_timeout: Duration::from_secs(30),
        });

        assert!(pool.add(WorkerProcess::detached(1)));
        assert!(pool.add(WorkerProcess::detached(2)));
        assert!(!pool.add(WorkerProcess::detached(3)));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_dead_worker_evicted() {
        let pool = make_pool(PoolConfig::default());
        let worker = ready_worker(1);
        pool.add(Arc::clone(&worker));
        assert_eq!(pool.size(), 1);

        worker.record_exit(Some(1));
        assert_eq!(pool.size(), 0);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_drain_kills_everything() {
        let pool = make_pool(PoolConfig::default());
        let a = ready_worker(1);
        let b = ready_worker(2);
        pool.add(Arc::clone(&a));
        pool.add(Arc::clone(&b));

        assert_eq!(pool.drain(), 2);
        assert_eq!(pool.size(), 0);
        assert!(a.is_killed());
        assert!(b.is_killed());
    }

    #[test]
    fn test_cleanup_stale_recycles_old_workers() {
        let pool = make_pool(PoolConfig {
            max_size: 4,
            min_size: 0,
            stale_timeout: Duration::from_millis(0),
        });
        let worker = ready_worker(1);
        pool.add(Arc::clone(&worker));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.cleanup_stale(), 1);
        assert_eq!(pool.size(), 0);
        assert!(worker.is_killed());
    }

    /// Fills the pool behind warmup's back: every `create` sneaks another
    /// worker into the pool first, so the returned worker loses the
    /// capacity race and gets rejected by `add`.
    struct RacingFactory {
        pool: Mutex<Option<IdlePool>>,
        created: Mutex<Vec<Arc<WorkerProcess>>>,
        next_pid: AtomicU32,
    }

    impl RacingFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pool: Mutex::new(None),
                created: Mutex::new(Vec::new()),
                next_pid: AtomicU32::new(1),
            })
        }
    }

    impl WorkerFactory for RacingFactory {
        fn create(&self, _spec: &SpawnSpec) -> ProcessResult<Arc<WorkerProcess>> {
            if let Some(pool) = self.pool.lock().clone() {
                pool.add(WorkerProcess::detached(
                    9000 + self.next_pid.load(Ordering::SeqCst),
                ));
            }
            let worker =
                WorkerProcess::detached(self.next_pid.fetch_add(1, Ordering::SeqCst));
            self.created.lock().push(Arc::clone(&worker));
            Ok(worker)
        }
    }

    #[test]
    fn test_warmup_kills_worker_rejected_by_capacity_race() {
        let factory = RacingFactory::new();
        let pool = IdlePool::new(
            PoolConfig {
                max_size: 1,
                min_size: 0,
                stale_timeout: Duration::from_secs(30),
            },
            Arc::clone(&factory) as Arc<dyn WorkerFactory>,
            Arc::new(DisposableRegistry::new()),
        );
        *factory.pool.lock() = Some(pool.clone());

        assert_eq!(pool.warmup(1), 0);
        assert_eq!(pool.size(), 1);

        // The rejected worker must not linger as an orphan
        let rejected = Arc::clone(&factory.created.lock()[0]);
        assert!(rejected.is_killed());
    }

    #[test]
    fn test_warmup_stops_at_capacity() {
        let pool = make_pool(PoolConfig {
            max_size: 2,
            min_size: 0,
            stale_timeout: Duration::from_secs(30),
        });
        assert_eq!(pool.warmup(5), 2);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_stats() {
        let pool = make_pool(PoolConfig::default());
        pool.add(ready_worker(1));
        pool.add(WorkerProcess::detached(2));

        let stats = pool.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.max_size, 4);
    }
}
