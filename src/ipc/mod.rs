/*!
 * IPC Module
 * Worker message protocol and the channel router
 */

mod router;
mod types;

pub use router::{
    GlobalHandlerFn, HandlerFn, HandlerOptions, MessageRouter, MiddlewareFn, Next, RouterDebugInfo,
};
pub use types::{Channel, Message, ProcessInfo, RouteError, RouteResult};
