/*!
 * Pool Module
 * Idle pre-warmed worker pool
 */

#[allow(clippy::module_inception)]
mod pool;
mod types;

pub use pool::IdlePool;
pub use types::{PoolStats, PooledWorker};
