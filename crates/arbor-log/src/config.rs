//! Log configuration.

use arbor_merkle::MerkleConfig;
use std::time::Duration;

/// Configuration for one topic's log.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Namespace of the log; every message must carry it.
    pub topic: String,

    /// Whether messages must be signed. Unsigned logs reject signatures.
    pub signatures: bool,

    /// How long a message may wait for missing parents before it is
    /// reported as stalled.
    pub pending_grace_period: Duration,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    pub merkle: MerkleConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            topic: "arbor".to_string(),
            signatures: false,
            pending_grace_period: Duration::from_secs(30),
            event_capacity: 1024,
            merkle: MerkleConfig::default(),
        }
    }
}

impl LogConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        LogConfig {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn builder(topic: impl Into<String>) -> LogConfigBuilder {
        LogConfigBuilder::new(topic)
    }
}

/// Builder for log configuration.
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            config: LogConfig::new(topic),
        }
    }

    pub fn signatures(mut self, required: bool) -> Self {
        self.config.signatures = required;
        self
    }

    pub fn pending_grace_period(mut self, period: Duration) -> Self {
        self.config.pending_grace_period = period;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn fanout(mut self, fanout: u32) -> Self {
        self.config.merkle.fanout = fanout;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LogConfig::builder("chat")
            .signatures(true)
            .pending_grace_period(Duration::from_millis(250))
            .event_capacity(0)
            .fanout(4)
            .build();

        assert_eq!(config.topic, "chat");
        assert!(config.signatures);
        assert_eq!(config.pending_grace_period, Duration::from_millis(250));
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.merkle.fanout, 4);
    }
}
