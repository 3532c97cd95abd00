use std::time::Duration;

use crate::types::Priority;

/// Top-level error surfaced to the embedding application.
///
/// Only start-up and configuration faults ever reach the caller; steady-state
/// transport faults are absorbed by the election timers.
#[derive(Debug, thiserror::Error)]
pub enum NotifelectError {
    #[error("priority allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("coordinator shut down")]
    ShutDown,
}

/// The priority source could not hand out a usable priority.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("priority source unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("priority sequence error: {0}")]
    Sequence(String),

    #[error("priority sequence exhausted")]
    Exhausted,

    #[error("allocator returned reserved priority {priority}")]
    Reserved { priority: Priority },
}

impl From<rusqlite::Error> for AllocationError {
    fn from(e: rusqlite::Error) -> Self {
        AllocationError::Sequence(e.to_string())
    }
}

/// Broadcast transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("transport unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("subscription closed")]
    Closed,
}

/// Malformed inbound payload. Never propagated out of the event loop.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid message: {reason}")]
    Invalid { reason: String },
}

impl From<rmp_serde::decode::Error> for DecodeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

/// Timer configuration that would cause livelock or election storms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("response_timeout ({response_timeout:?}) must be shorter than election_interval ({election_interval:?})")]
    ResponseTimeoutTooLong {
        response_timeout: Duration,
        election_interval: Duration,
    },

    #[error("heartbeat_interval ({heartbeat_interval:?}) must be shorter than leader_timeout ({leader_timeout:?})")]
    HeartbeatTooSlow {
        heartbeat_interval: Duration,
        leader_timeout: Duration,
    },

    #[error("election_jitter ({election_jitter:?}) must not exceed election_interval ({election_interval:?})")]
    JitterTooLarge {
        election_jitter: Duration,
        election_interval: Duration,
    },

    #[error("max_publish_failures must be at least 1")]
    ZeroPublishFailures,

    #[error("event_buffer must be at least 1")]
    ZeroEventBuffer,
}
