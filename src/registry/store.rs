//! Channel registry implementation
//!
//! The name → channel map. Only `register` and `unregister` write to it;
//! lookups take the read lock for a single map access and never wait on
//! packet I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::queue::QueueConfig;

use super::entry::{Channel, ChannelStats};
use super::error::RegistryError;

/// Normalize a path-like channel name
///
/// `"/live/movie/"` and `"live/movie"` address the same channel.
pub fn normalize_name(name: &str) -> &str {
    name.trim_matches('/')
}

/// Central registry for all live channels
pub struct ChannelRegistry {
    /// Map of channel name to the current publish session
    channels: RwLock<HashMap<String, Arc<Channel>>>,

    /// Queue configuration for new channels
    queue_config: QueueConfig,

    next_session_id: AtomicU64,
}

impl ChannelRegistry {
    /// Create a new registry with default queue configuration
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a new registry with custom queue configuration
    pub fn with_config(queue_config: QueueConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            queue_config,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Queue configuration applied to new channels
    pub fn queue_config(&self) -> &QueueConfig {
        &self.queue_config
    }

    /// Claim a channel name for a new publisher
    ///
    /// Returns an error if a live publisher already owns the name; that
    /// publisher keeps ownership.
    pub async fn register(&self, name: &str) -> Result<Arc<Channel>, RegistryError> {
        let name = normalize_name(name);
        let mut channels = self.channels.write().await;

        if channels.contains_key(name) {
            tracing::warn!(channel = %name, "Publish rejected: channel already live");
            return Err(RegistryError::AlreadyPublishing(name.to_string()));
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(Channel::new(name.to_string(), session_id, &self.queue_config));
        channels.insert(name.to_string(), Arc::clone(&channel));

        tracing::info!(
            channel = %name,
            session_id = session_id,
            channels = channels.len(),
            "Publisher registered"
        );

        Ok(channel)
    }

    /// Find the live channel for a name
    pub async fn lookup(&self, name: &str) -> Result<Arc<Channel>, RegistryError> {
        let name = normalize_name(name);
        self.channels
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Remove a channel, but only if the registry still points at it
    ///
    /// A newer publisher may already have registered under the same name;
    /// its entry is left alone. Returns whether an entry was removed.
    pub async fn unregister(&self, channel: &Arc<Channel>) -> bool {
        let mut channels = self.channels.write().await;
        remove_current(&mut channels, channel)
    }

    /// Non-blocking [`unregister`](Self::unregister)
    ///
    /// Returns `None` without touching the map if the lock is held
    /// elsewhere. Usable from `Drop`.
    pub fn try_unregister(&self, channel: &Arc<Channel>) -> Option<bool> {
        let mut channels = self.channels.try_write().ok()?;
        Some(remove_current(&mut channels, channel))
    }

    /// Whether a name currently has a live publisher
    pub async fn is_live(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(normalize_name(name))
    }

    /// Number of live channels
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Names of all live channels, sorted
    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics for a live channel
    pub async fn stats(&self, name: &str) -> Option<ChannelStats> {
        self.lookup(name).await.ok().map(|channel| channel.stats())
    }
}

/// Remove `channel` if the map still points at this exact session
fn remove_current(channels: &mut HashMap<String, Arc<Channel>>, channel: &Arc<Channel>) -> bool {
    match channels.get(channel.name()) {
        Some(current) if Arc::ptr_eq(current, channel) => {
            channels.remove(channel.name());
            tracing::info!(
                channel = %channel.name(),
                session_id = channel.session_id(),
                channels = channels.len(),
                "Publisher unregistered"
            );
            true
        }
        Some(current) => {
            tracing::debug!(
                channel = %channel.name(),
                expected = channel.session_id(),
                actual = current.session_id(),
                "Unregister skipped: channel belongs to a newer publisher"
            );
            false
        }
        None => false,
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
