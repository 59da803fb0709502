//! Configuration for the distribution manager.

use basalt_wire::WireVersion;
use std::time::Duration;

/// Configuration for message dispatch and reply waits.
#[derive(Clone, Debug)]
pub struct DistributionConfig {
    /// How long a wait may run before pending members are logged (ms).
    pub ack_wait_threshold_ms: u64,
    /// Default timeout for reply waits (ms).
    pub reply_timeout_ms: u64,
    /// Number of worker tasks draining the inbound queue.
    pub worker_count: usize,
    /// Version written into outbound frame headers.
    pub wire_version: WireVersion,
    /// Largest frame accepted in either direction.
    pub max_frame_bytes: usize,
}

impl DistributionConfig {
    pub fn ack_wait_threshold(&self) -> Duration {
        Duration::from_millis(self.ack_wait_threshold_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            ack_wait_threshold_ms: 15_000,
            reply_timeout_ms: 30_000,
            worker_count: 4,
            wire_version: WireVersion::CURRENT,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Builder for distribution configuration.
pub struct DistributionConfigBuilder {
    config: DistributionConfig,
}

impl DistributionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DistributionConfig::default(),
        }
    }

    pub fn ack_wait_threshold(mut self, ms: u64) -> Self {
        self.config.ack_wait_threshold_ms = ms;
        self
    }

    pub fn reply_timeout(mut self, ms: u64) -> Self {
        self.config.reply_timeout_ms = ms;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count.max(1);
        self
    }

    pub fn wire_version(mut self, version: WireVersion) -> Self {
        self.config.wire_version = version;
        self
    }

    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.config.max_frame_bytes = bytes;
        self
    }

    pub fn build(self) -> DistributionConfig {
        self.config
    }
}

impl Default for DistributionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DistributionConfig::default();
        assert_eq!(config.ack_wait_threshold(), Duration::from_secs(15));
        assert_eq!(config.reply_timeout(), Duration::from_secs(30));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.wire_version, WireVersion::CURRENT);
    }

    #[test]
    fn test_builder() {
        let config = DistributionConfigBuilder::new()
            .ack_wait_threshold(50)
            .reply_timeout(200)
            .worker_count(0)
            .wire_version(WireVersion::V1_0)
            .max_frame_bytes(1024)
            .build();
        assert_eq!(config.ack_wait_threshold_ms, 50);
        assert_eq!(config.reply_timeout_ms, 200);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.wire_version, WireVersion::V1_0);
        assert_eq!(config.max_frame_bytes, 1024);
    }
}
