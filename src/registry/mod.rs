/*!
 * Disposable Registry Module
 * Scoped cleanup of listeners, timers, and abort handles
 */

mod disposable;
#[allow(clippy::module_inception)]
mod registry;

pub use disposable::Disposable;
pub use registry::{DisposableRegistry, RegistryDebugInfo, SharedRegistry};
