/*!
 * Heartbeat Module
 * Worker liveness monitoring
 */

mod manager;
mod types;

pub use manager::HeartbeatManager;
pub use types::{HeartbeatDebugInfo, HeartbeatRecord, MissedCallback, VisibilityFn};
