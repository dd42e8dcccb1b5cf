//! Queue configuration
//!
//! Retention limits for a channel's packet window.

use serde::Deserialize;

/// Configuration for a broadcast queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of most recent GOPs kept for late joiners
    ///
    /// Older packets are only kept while a live cursor still needs them.
    pub max_gop_count: usize,

    /// Hard cap on retained payload bytes
    ///
    /// Cursors that fall behind this window are force-advanced to the
    /// latest keyframe.
    pub max_buffer_bytes: usize,

    /// Hard cap on retained packets
    pub max_buffer_packets: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_gop_count: 2,
            max_buffer_bytes: 8 * 1024 * 1024, // 8MB
            max_buffer_packets: 4096,          // ~60s of A/V @ 30fps + 44.1kHz AAC
        }
    }
}

impl QueueConfig {
    /// Create a new queue config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of GOPs retained for late joiners
    pub fn max_gop_count(mut self, count: usize) -> Self {
        self.max_gop_count = count.max(1);
        self
    }

    /// Set the hard byte cap
    pub fn max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Set the hard packet cap
    pub fn max_buffer_packets(mut self, packets: usize) -> Self {
        self.max_buffer_packets = packets.max(1);
        self
    }

    /// Check limits that bypassed the builder (e.g. deserialized ones)
    pub fn validate(&self) -> Result<(), String> {
        if self.max_gop_count == 0 {
            return Err("queue.max_gop_count must be at least 1".into());
        }
        if self.max_buffer_packets == 0 {
            return Err("queue.max_buffer_packets must be at least 1".into());
        }
        if self.max_buffer_bytes == 0 {
            return Err("queue.max_buffer_bytes must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_to_one() {
        let config = QueueConfig::new().max_gop_count(0).max_buffer_packets(0);
        assert_eq!(config.max_gop_count, 1);
        assert_eq!(config.max_buffer_packets, 1);
    }

    #[test]
    fn test_validate() {
        assert!(QueueConfig::default().validate().is_ok());

        let config: QueueConfig = toml::from_str("max_gop_count = 0").unwrap();
        assert!(config.validate().unwrap_err().contains("max_gop_count"));

        let config: QueueConfig = toml::from_str("max_buffer_packets = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: QueueConfig = toml::from_str("max_gop_count = 4").unwrap();
        assert_eq!(config.max_gop_count, 4);
        assert_eq!(config.max_buffer_bytes, QueueConfig::default().max_buffer_bytes);
    }
}
