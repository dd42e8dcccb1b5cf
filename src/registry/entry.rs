//! Channel values stored in the registry
//!
//! A [`Channel`] is created once per publish session and never mutated in
//! place for a new publisher. Subscribers holding an old `Arc<Channel>` keep
//! reading its (closed) queue while a new publisher's channel replaces it in
//! the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::queue::{Cursor, Queue, QueueConfig, QueueState};

/// One publish session under a name
#[derive(Debug)]
pub struct Channel {
    name: String,
    session_id: u64,
    queue: Arc<Queue>,
    created_at: Instant,
}

impl Channel {
    pub(super) fn new(name: String, session_id: u64, config: &QueueConfig) -> Self {
        Self {
            name,
            session_id,
            queue: Queue::with_config(config.clone()),
            created_at: Instant::now(),
        }
    }

    /// Normalized channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry-unique id of this publish session
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The channel's broadcast queue
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Cursor at the latest keyframe
    pub fn latest(&self) -> Cursor {
        self.queue.latest()
    }

    /// Time since the publisher registered
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Snapshot statistics
    pub fn stats(&self) -> ChannelStats {
        let queue = self.queue.stats();
        ChannelStats {
            name: self.name.clone(),
            session_id: self.session_id,
            subscribers: queue.cursors,
            state: queue.state,
            packets_written: queue.packets_written,
            bytes_written: queue.bytes_written,
            keyframes: queue.keyframes,
            retained_packets: queue.retained_packets,
            age: self.age(),
        }
    }
}

/// Statistics for a channel
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub name: String,
    pub session_id: u64,
    /// Number of live cursors
    pub subscribers: usize,
    pub state: QueueState,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub keyframes: u64,
    /// Packets currently held for late joiners and slow readers
    pub retained_packets: usize,
    pub age: Duration,
}

impl ChannelStats {
    /// Average ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.age.as_secs();
        if secs > 0 {
            (self.bytes_written * 8) / secs
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_stats_new() {
        let channel = Channel::new("movie".into(), 7, &QueueConfig::default());
        let stats = channel.stats();

        assert_eq!(stats.name, "movie");
        assert_eq!(stats.session_id, 7);
        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.state, QueueState::Empty);
        assert_eq!(stats.packets_written, 0);
    }

    #[test]
    fn test_channel_stats_counts_cursors() {
        let channel = Channel::new("movie".into(), 1, &QueueConfig::default());
        let _a = channel.latest();
        let _b = channel.latest();

        assert_eq!(channel.stats().subscribers, 2);
    }

    #[test]
    fn test_bitrate_zero_age() {
        let stats = ChannelStats {
            name: "x".into(),
            session_id: 1,
            subscribers: 0,
            state: QueueState::Streaming,
            packets_written: 10,
            bytes_written: 1_000_000,
            keyframes: 1,
            retained_packets: 10,
            age: Duration::from_secs(10),
        };
        assert_eq!(stats.bitrate(), 800_000);

        let stats = ChannelStats {
            age: Duration::ZERO,
            ..stats
        };
        assert_eq!(stats.bitrate(), 0);
    }
}
