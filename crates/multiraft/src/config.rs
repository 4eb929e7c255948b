//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{ConsensusResult, Error};

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Time between ticks of the run loop
    pub tick_interval: Duration,

    /// Deadline for a single group's advance step
    pub tick_timeout: Duration,

    /// Transport configuration
    pub transport: TransportConfig,
}

/// Pipelined transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum in-flight messages per peer
    pub inflight_limit: usize,

    /// Capacity of each peer's queue
    pub queue_capacity: usize,

    /// Maximum number of connected peers, unlimited when unset
    pub max_peers: Option<usize>,
}

impl CoordinatorConfig {
    /// Parse a configuration from JSON, filling unset fields with defaults
    pub fn from_json(json: &str) -> ConsensusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits and intervals the coordinator cannot run with
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::configuration("tick_interval must be greater than zero"));
        }
        if self.tick_timeout.is_zero() {
            return Err(Error::configuration("tick_timeout must be greater than zero"));
        }
        if self.tick_timeout > self.tick_interval {
            warn!(
                tick_timeout = %humantime::format_duration(self.tick_timeout),
                tick_interval = %humantime::format_duration(self.tick_interval),
                "Tick timeout exceeds tick interval; slow groups will delay later ticks"
            );
        }
        self.transport.validate()
    }
}

impl TransportConfig {
    /// Reject transport limits of zero
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.inflight_limit == 0 {
            return Err(Error::configuration("inflight_limit must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::configuration("queue_capacity must be greater than zero"));
        }
        if self.max_peers == Some(0) {
            return Err(Error::configuration("max_peers must be greater than zero when set"));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            tick_timeout: Duration::from_millis(100),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inflight_limit: 100,
            queue_capacity: 1000,
            max_peers: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.transport.inflight_limit, 100);
        assert_eq!(config.transport.queue_capacity, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = CoordinatorConfig::default();
        config.transport.inflight_limit = 0;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = CoordinatorConfig::default();
        config.transport.queue_capacity = 0;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = CoordinatorConfig::default();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = CoordinatorConfig::default();
        config.transport.max_peers = Some(0);
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CoordinatorConfig::from_json(
            r#"{"transport": {"inflight_limit": 2, "queue_capacity": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.transport.inflight_limit, 2);
        assert_eq!(config.transport.queue_capacity, 5);
        assert_eq!(config.transport.max_peers, None);
        assert_eq!(config.tick_interval, Duration::from_millis(100));

        let err = CoordinatorConfig::from_json(r#"{"transport": {"inflight_limit": 0}}"#)
            .unwrap_err();
        assert!(err.is_configuration());

        assert!(CoordinatorConfig::from_json("not json").unwrap_err().is_configuration());
    }
}
