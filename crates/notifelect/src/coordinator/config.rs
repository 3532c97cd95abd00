use std::time::Duration;

use crate::error::ConfigError;
use crate::types::Namespace;

/// Configuration for one election participant.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Election group to join.
    pub namespace: Namespace,
    /// How long a follower without a leader waits before standing.
    pub election_interval: Duration,
    /// How long a candidate waits for higher challengers before claiming.
    pub response_timeout: Duration,
    /// Leader heartbeat period. Also the re-subscribe retry period.
    pub heartbeat_interval: Duration,
    /// Silence after which a follower declares its leader dead.
    pub leader_timeout: Duration,
    /// Upper bound of the random delay before re-electing after leader loss.
    pub election_jitter: Duration,
    /// Consecutive publish failures after which a leader steps down.
    pub max_publish_failures: u32,
    /// Capacity of the election event channel.
    pub event_buffer: usize,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::default(),
            election_interval: Duration::from_secs(20),
            response_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            leader_timeout: Duration::from_secs(15),
            election_jitter: Duration::from_secs(1),
            max_publish_failures: 3,
            event_buffer: 64,
        }
    }
}

impl ElectionConfig {
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Reject timer combinations that livelock or cause election storms.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("election_interval", self.election_interval),
            ("response_timeout", self.response_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("leader_timeout", self.leader_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.response_timeout >= self.election_interval {
            return Err(ConfigError::ResponseTimeoutTooLong {
                response_timeout: self.response_timeout,
                election_interval: self.election_interval,
            });
        }
        if self.heartbeat_interval >= self.leader_timeout {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat_interval: self.heartbeat_interval,
                leader_timeout: self.leader_timeout,
            });
        }
        if self.election_jitter > self.election_interval {
            return Err(ConfigError::JitterTooLarge {
                election_jitter: self.election_jitter,
                election_interval: self.election_interval,
            });
        }
        if self.max_publish_failures == 0 {
            return Err(ConfigError::ZeroPublishFailures);
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroEventBuffer);
        }
        Ok(())
    }
}
