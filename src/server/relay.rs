//! Publish and play entry points shared by connection handlers

use std::sync::Arc;

use crate::av::{Sink, Source};
use crate::error::Result;
use crate::pipeline::{self, Pipeline};
use crate::queue::Cursor;
use crate::registry::{Channel, ChannelRegistry};
use crate::server::config::RelayConfig;
use crate::transcode::{CodecPolicy, CodecRegistry, TranscodeOptions, Transcoder};

/// Server-owned relay state
///
/// Holds the channel registry, the codec policy and the encoder options.
/// Connection handlers share one `Relay` behind an `Arc`.
pub struct Relay {
    registry: Arc<ChannelRegistry>,
    policy: Arc<dyn CodecPolicy>,
    transcode: TranscodeOptions,
}

impl Relay {
    /// Create a relay with every codec compiled into this build
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_policy(config, Arc::new(CodecRegistry::with_available()))
    }

    /// Create a relay with a custom codec policy
    pub fn with_policy(config: &RelayConfig, policy: Arc<dyn CodecPolicy>) -> Self {
        Self {
            registry: Arc::new(ChannelRegistry::with_config(config.queue.clone())),
            policy,
            transcode: config.transcode.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn transcode_options(&self) -> &TranscodeOptions {
        &self.transcode
    }

    /// Wrap a source in the transcode bridge configured for this relay
    pub fn transcoder<S: Source>(&self, source: S) -> Transcoder<S> {
        Transcoder::new(source, Arc::clone(&self.policy), self.transcode.clone())
    }

    /// Publish `source` under `name` until it ends
    ///
    /// Fails immediately with `AlreadyPublishing` if the name is taken.
    /// However the session ends, the channel's queue is closed before the
    /// name is released, so subscribers of this session see end of stream
    /// and never a later publisher's packets. This also holds when the
    /// returned future is dropped before completion.
    pub async fn publish<S: Source>(&self, name: &str, source: S) -> Result<u64> {
        let channel = self.registry.register(name).await?;
        let guard = PublishGuard::new(Arc::clone(&self.registry), Arc::clone(&channel));
        let mut transcoder = self.transcoder(source);

        let result = feed(&channel, &mut transcoder).await;

        guard.release().await;

        match &result {
            Ok(packets) => tracing::info!(
                channel = %channel.name(),
                session_id = channel.session_id(),
                packets = packets,
                "Publish ended"
            ),
            Err(e) => tracing::warn!(
                channel = %channel.name(),
                session_id = channel.session_id(),
                error = %e,
                "Publish failed"
            ),
        }

        result
    }

    /// Cursor at the latest keyframe of a live channel
    pub async fn subscribe(&self, name: &str) -> Result<Cursor> {
        let channel = self.registry.lookup(name).await?;
        let cursor = channel.latest();

        tracing::debug!(
            channel = %channel.name(),
            session_id = channel.session_id(),
            subscribers = channel.queue().cursor_count(),
            "Subscriber attached"
        );

        Ok(cursor)
    }

    /// Copy a live channel into `sink` until the publisher leaves
    pub async fn play<K: Sink>(&self, name: &str, sink: K) -> Result<u64> {
        let mut cursor = self.subscribe(name).await?;
        pipeline::copy(&mut cursor, sink).await
    }
}

async fn feed<S: Source>(channel: &Channel, source: &mut S) -> Result<u64> {
    let mut pipeline = Pipeline::new(Arc::clone(channel.queue()));
    let packets = pipeline.run(source).await?;
    pipeline.finish().await?;
    Ok(packets)
}

/// Ends a publish session: closes the queue, then releases the name
///
/// Dropping an unreleased guard does the same without awaiting. If the
/// registry lock is busy at that point, the unregister finishes on a
/// spawned task.
struct PublishGuard {
    registry: Arc<ChannelRegistry>,
    channel: Arc<Channel>,
    released: bool,
}

impl PublishGuard {
    fn new(registry: Arc<ChannelRegistry>, channel: Arc<Channel>) -> Self {
        Self {
            registry,
            channel,
            released: false,
        }
    }

    async fn release(mut self) {
        self.channel.queue().close();
        self.registry.unregister(&self.channel).await;
        self.released = true;
    }
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::warn!(
            channel = %self.channel.name(),
            session_id = self.channel.session_id(),
            "Publish cancelled"
        );
        self.channel.queue().close();

        if self.registry.try_unregister(&self.channel).is_some() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                let channel = Arc::clone(&self.channel);
                handle.spawn(async move {
                    registry.unregister(&channel).await;
                });
            }
            Err(_) => tracing::error!(
                channel = %self.channel.name(),
                "No runtime to release channel name"
            ),
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("transcode", &self.transcode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::av::{
        AudioCodecType, AudioParams, CodecSet, Packet, Rational, StreamInfo, VideoCodecType,
        VideoParams,
    };
    use crate::error::Error;
    use crate::registry::RegistryError;

    /// Source fed by the test through a channel
    struct ChannelSource {
        streams: CodecSet,
        rx: mpsc::UnboundedReceiver<Packet>,
    }

    impl Source for ChannelSource {
        async fn streams(&mut self) -> Result<CodecSet> {
            Ok(self.streams.clone())
        }

        async fn read_packet(&mut self) -> Result<Option<Packet>> {
            Ok(self.rx.recv().await)
        }
    }

    fn av_streams() -> CodecSet {
        CodecSet::new(vec![
            StreamInfo::Video(VideoParams::new(
                VideoCodecType::H264,
                640,
                360,
                Rational::new(30, 1),
            )),
            StreamInfo::Audio(AudioParams::new(AudioCodecType::Aac, 44100, 2)),
        ])
    }

    fn source(streams: CodecSet) -> (ChannelSource, mpsc::UnboundedSender<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSource { streams, rx }, tx)
    }

    fn video(ms: u64, key: bool) -> Packet {
        Packet::new(0, Duration::from_millis(ms), key, Bytes::from_static(b"v"))
    }

    async fn wait_live(relay: &Relay, name: &str) {
        while !relay.registry().is_live(name).await {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let relay = Arc::new(Relay::new(&RelayConfig::default()));
        let (src, tx) = source(av_streams());

        let publisher = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.publish("/movie", src).await })
        };
        wait_live(&relay, "movie").await;

        let mut cursor = relay.subscribe("movie").await.unwrap();
        tx.send(video(0, true)).unwrap();
        tx.send(video(33, false)).unwrap();

        assert_eq!(cursor.streams().await.unwrap(), av_streams());
        assert_eq!(cursor.read().await.unwrap().time, Duration::from_millis(0));
        assert_eq!(cursor.read().await.unwrap().time, Duration::from_millis(33));

        drop(tx);
        assert_eq!(publisher.await.unwrap().unwrap(), 2);
        assert!(cursor.read().await.is_none());
        assert!(!relay.registry().is_live("movie").await);
    }

    #[tokio::test]
    async fn test_second_publisher_rejected() {
        let relay = Arc::new(Relay::new(&RelayConfig::default()));
        let (first, tx) = source(av_streams());

        let publisher = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.publish("movie", first).await })
        };
        wait_live(&relay, "movie").await;

        let (second, _tx2) = source(av_streams());
        let err = relay.publish("movie", second).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::AlreadyPublishing(_))
        ));

        // The first publisher still owns the name
        assert!(relay.registry().is_live("movie").await);

        drop(tx);
        publisher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_negotiation_failure_releases_name() {
        // rawvideo input with an H.264 target: no builtin encoder
        let config = RelayConfig::default()
            .transcode(TranscodeOptions::new().codec(VideoCodecType::H264));
        let relay = Relay::new(&config);
        let streams = CodecSet::new(vec![StreamInfo::Video(VideoParams::new(
            VideoCodecType::RawVideo,
            64,
            48,
            Rational::new(25, 1),
        ))]);
        let (src, _tx) = source(streams);

        let err = relay.publish("cam", src).await.unwrap_err();
        assert!(matches!(err, Error::CodecUnsupported(_)));
        assert!(!relay.registry().is_live("cam").await);

        // The name is free again
        let (src, tx) = source(av_streams());
        drop(tx);
        assert_eq!(relay.publish("cam", src).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aborted_publish_releases_channel() {
        let relay = Arc::new(Relay::new(&RelayConfig::default()));
        let (src, tx) = source(av_streams());

        let publisher = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.publish("movie", src).await })
        };
        wait_live(&relay, "movie").await;

        let mut cursor = relay.subscribe("movie").await.unwrap();
        tx.send(video(0, true)).unwrap();
        assert!(cursor.read().await.is_some());

        publisher.abort();
        assert!(publisher.await.unwrap_err().is_cancelled());

        // Subscribers see end of stream instead of waiting forever
        let read = tokio::time::timeout(Duration::from_secs(1), cursor.read())
            .await
            .expect("reader not woken");
        assert!(read.is_none());
        assert!(cursor.queue().is_closed());

        tokio::time::timeout(Duration::from_secs(1), async {
            while relay.registry().is_live("movie").await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("name not released");

        // The name can be published again
        let (src, tx) = source(av_streams());
        drop(tx);
        assert_eq!(relay.publish("movie", src).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_play_unknown_channel() {
        let relay = Relay::new(&RelayConfig::default());
        let queue = crate::queue::Queue::new();

        let err = relay.play("nothing", queue).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
