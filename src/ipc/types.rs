/*!
 * IPC Types
 * Worker protocol messages, channels, and routing errors
 */

use crate::core::types::Pid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Routing operation result
pub type RouteResult<T> = Result<T, RouteError>;

/// Routing errors. Caught and logged at the router boundary; they never
/// propagate to the message pump.
#[derive(Error, Debug, Clone)]
pub enum RouteError {
    #[error("Handler failed on channel '{channel}': {reason}")]
    Handler { channel: String, reason: String },

    #[error("Middleware failed: {0}")]
    Middleware(String),
}

impl RouteError {
    pub fn handler(channel: &Channel, reason: impl Into<String>) -> Self {
        Self::Handler {
            channel: channel.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// Message channel tag. The reserved protocol channels are first-class
/// variants; application-defined channels ride in `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    /// Reserved: worker signals pool-admission readiness
    Ready,
    /// Reserved: liveness ping/response
    Heartbeat,
    Log,
    Prompt,
    WindowOp,
    Custom(String),
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Ready => "ready",
            Channel::Heartbeat => "heartbeat",
            Channel::Log => "log",
            Channel::Prompt => "prompt",
            Channel::WindowOp => "window_op",
            Channel::Custom(name) => name,
        }
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ready" => Channel::Ready,
            "heartbeat" => Channel::Heartbeat,
            "log" => Channel::Log,
            "prompt" => Channel::Prompt,
            "window_op" => Channel::WindowOp,
            _ => Channel::Custom(value),
        }
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.as_str().to_string()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured message exchanged with a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            value: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Liveness ping carried on the reserved heartbeat channel
    pub fn heartbeat_ping() -> Self {
        Self::new(Channel::Heartbeat).with_correlation_id(uuid::Uuid::new_v4().to_string())
    }
}

/// Per-process routing context supplied by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct ProcessInfo {
    pub pid: Pid,
    /// Channels suppressed for this process regardless of registration
    pub prevent_channels: HashSet<Channel>,
}

impl ProcessInfo {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            prevent_channels: HashSet::new(),
        }
    }
}
