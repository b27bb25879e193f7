//! Application and sync configuration.

use arbor_log::{LogConfig, SyncOptions};
use arbor_runtime::{MissingActionPolicy, RuntimeConfig};
use std::time::Duration;

/// Configuration for sync behavior.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Deadline for one sync round.
    pub round_timeout: Duration,
    /// Rounds per exchange before it is reported incomplete.
    pub max_rounds: usize,
    /// Identifiers requested per message fetch.
    pub batch_size: usize,
    /// Wait after the first failure with a peer.
    pub initial_backoff: Duration,
    /// Upper bound of the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(10),
            max_rounds: 8,
            batch_size: 128,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Per-exchange limits handed to the sync driver.
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            round_timeout: self.round_timeout,
            max_rounds: self.max_rounds,
            batch_size: self.batch_size,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn round_timeout(mut self, timeout: Duration) -> Self {
        self.config.round_timeout = timeout;
        self
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.config.max_rounds = rounds;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max.max(initial);
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for one application topic.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub log: LogConfig,
    pub runtime: RuntimeConfig,
    pub sync: SyncConfig,
    /// Validity of the sessions an account creates, in milliseconds;
    /// `None` never expires.
    pub session_duration: Option<u64>,
}

impl AppConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            log: LogConfig::new(topic),
            runtime: RuntimeConfig::default(),
            sync: SyncConfig::default(),
            session_duration: Some(24 * 60 * 60 * 1000),
        }
    }

    pub fn builder(topic: impl Into<String>) -> AppConfigBuilder {
        AppConfigBuilder::new(topic)
    }

    pub fn topic(&self) -> &str {
        &self.log.topic
    }
}

/// Builder for application configuration.
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            config: AppConfig::new(topic),
        }
    }

    /// Require every message to be signed.
    pub fn signatures(mut self, required: bool) -> Self {
        self.config.log.signatures = required;
        self
    }

    pub fn pending_grace_period(mut self, period: Duration) -> Self {
        self.config.log.pending_grace_period = period;
        self
    }

    pub fn missing_actions(mut self, policy: MissingActionPolicy) -> Self {
        self.config.runtime.missing_actions = policy;
        self
    }

    pub fn commit_retries(mut self, retries: u32) -> Self {
        self.config.runtime.commit_retries = retries;
        self
    }

    /// Reject actions that are not signed under a session.
    pub fn require_sessions(mut self, required: bool) -> Self {
        self.config.runtime.require_sessions = required;
        self
    }

    pub fn session_duration(mut self, duration: Option<u64>) -> Self {
        self.config.session_duration = duration;
        self
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfigBuilder::new()
            .round_timeout(Duration::from_secs(2))
            .max_rounds(3)
            .batch_size(0)
            .backoff(Duration::from_millis(100), Duration::from_millis(50))
            .build();

        assert_eq!(config.round_timeout, Duration::from_secs(2));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_backoff, Duration::from_millis(100));
        assert_eq!(config.options().max_rounds, 3);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = SyncConfigBuilder::new()
            .backoff(Duration::from_millis(100), Duration::from_secs(1))
            .build();

        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_secs(1));
        assert_eq!(config.backoff(64), Duration::from_secs(1));
    }

    #[test]
    fn test_app_config_builder() {
        let config = AppConfig::builder("chat")
            .signatures(true)
            .require_sessions(true)
            .missing_actions(MissingActionPolicy::Skip)
            .session_duration(None)
            .build();

        assert_eq!(config.topic(), "chat");
        assert!(config.log.signatures);
        assert!(config.runtime.require_sessions);
        assert_eq!(config.runtime.missing_actions, MissingActionPolicy::Skip);
        assert_eq!(config.session_duration, None);
    }
}
