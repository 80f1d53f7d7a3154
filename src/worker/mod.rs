/*!
 * Worker Module
 * Worker process handles, the stdio message protocol, and spawning
 */

mod factory;
mod process;
mod types;

pub use factory::{CommandWorkerFactory, WorkerFactory};
pub use process::{WorkerProcess, WorkerSubscription};
pub use types::{SpawnSpec, WorkerEvent};
