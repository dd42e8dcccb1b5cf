//! Broadcast queue for one channel
//!
//! The publisher appends packets; any number of [`Cursor`]s read them back
//! independently, each at its own pace.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<Queue>
//!               ┌──────────────────────────────┐
//!   publisher   │ Mutex<Inner> {               │
//!  write_packet─┼─►  header: CodecSet,         │
//!               │    window: [head .. tail),   │◄── Cursor A (position 41)
//!               │    cursors: {id -> pos},     │◄── Cursor B (position 57)
//!               │  }                           │
//!               │ Notify ── wakes blocked reads│
//!               └──────────────────────────────┘
//! ```
//!
//! The lock is only held for window bookkeeping, never across an `.await`,
//! so a slow subscriber cannot stall the publisher or other channels.
//!
//! # Retention
//!
//! The window keeps the newest `max_gop_count` GOPs for late joiners, plus
//! whatever older packets live cursors still need, bounded by hard byte and
//! packet caps. A cursor that falls out of the window is moved to the newest
//! keyframe and its discontinuity counter is bumped.

pub mod config;
pub mod cursor;
pub mod error;
mod window;

pub use config::QueueConfig;
pub use cursor::{Cursor, ReadOutcome};
pub use error::QueueError;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::av::{self, CodecSet, Packet};
use crate::error::Result;

use window::PacketWindow;

/// Lifecycle of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No header yet
    Empty,
    /// Header written, no packet yet
    HeaderWritten,
    /// At least one packet written
    Streaming,
    /// Terminal; remaining packets can still be drained
    Closed,
}

/// Statistics for a queue
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub state: QueueState,
    /// Packets written since creation
    pub packets_written: u64,
    /// Payload bytes written since creation
    pub bytes_written: u64,
    /// Keyframe boundaries written since creation
    pub keyframes: u64,
    /// Packets currently retained
    pub retained_packets: usize,
    /// Payload bytes currently retained
    pub retained_bytes: usize,
    /// Live cursors
    pub cursors: usize,
}

pub(crate) struct Inner {
    pub(crate) state: QueueState,
    pub(crate) header: Option<CodecSet>,
    /// Stream whose keyframes delimit GOPs; `None` means every packet does
    video_index: Option<usize>,
    pub(crate) window: PacketWindow,
    /// Live cursor id -> next sequence number it will read
    cursors: HashMap<u64, u64>,
    next_cursor_id: u64,
    packets_written: u64,
    bytes_written: u64,
    keyframes: u64,
}

impl Inner {
    fn is_boundary(&self, packet: &Packet) -> bool {
        match self.video_index {
            Some(index) => packet.stream_index == index && packet.is_keyframe,
            None => true,
        }
    }

    fn slowest_cursor(&self) -> Option<u64> {
        self.cursors.values().min().copied()
    }

    pub(crate) fn update_cursor(&mut self, id: u64, position: u64) {
        if let Some(pos) = self.cursors.get_mut(&id) {
            *pos = position;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == QueueState::Closed
    }
}

/// Append-only packet log with independent reader cursors
pub struct Queue {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) notify: Notify,
    config: QueueConfig,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Queue")
            .field("state", &inner.state)
            .field("head", &inner.window.head())
            .field("tail", &inner.window.tail())
            .field("cursors", &inner.cursors.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Create a queue with default retention
    pub fn new() -> Arc<Self> {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with custom retention
    pub fn with_config(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: QueueState::Empty,
                header: None,
                video_index: None,
                window: PacketWindow::new(),
                cursors: HashMap::new(),
                next_cursor_id: 1,
                packets_written: 0,
                bytes_written: 0,
                keyframes: 0,
            }),
            notify: Notify::new(),
            config,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Set the stream descriptors; allowed exactly once, before any packet
    pub fn write_header(&self, streams: CodecSet) -> std::result::Result<(), QueueError> {
        let mut inner = self.inner.lock();

        match inner.state {
            QueueState::Empty => {}
            QueueState::Closed => return Err(QueueError::QueueClosed),
            QueueState::HeaderWritten | QueueState::Streaming => {
                return Err(QueueError::HeaderAlreadyWritten)
            }
        }

        tracing::debug!(streams = streams.len(), "Queue header written");

        inner.video_index = streams.video_index();
        inner.header = Some(streams);
        inner.state = QueueState::HeaderWritten;
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Append a packet and wake every blocked cursor
    ///
    /// Single producer: only the publishing task calls this. Returns the
    /// packet's sequence number.
    pub fn write_packet(&self, packet: Packet) -> std::result::Result<u64, QueueError> {
        let mut inner = self.inner.lock();

        match inner.state {
            QueueState::Empty => return Err(QueueError::InvalidState),
            QueueState::Closed => return Err(QueueError::QueueClosed),
            QueueState::HeaderWritten | QueueState::Streaming => {}
        }

        let streams = inner.header.as_ref().map_or(0, CodecSet::len);
        if packet.stream_index >= streams {
            return Err(QueueError::InvalidStreamIndex {
                index: packet.stream_index,
                streams,
            });
        }

        let boundary = inner.is_boundary(&packet);
        inner.packets_written += 1;
        inner.bytes_written += packet.size() as u64;
        if boundary {
            inner.keyframes += 1;
        }

        let size = packet.size();
        let seq = inner.window.push(packet, boundary);
        inner.state = QueueState::Streaming;

        let pinned = inner.slowest_cursor();
        let dropped = inner.window.trim(&self.config, pinned);
        drop(inner);

        tracing::trace!(seq = seq, size = size, boundary = boundary, dropped = dropped, "Packet queued");

        self.notify.notify_waiters();
        Ok(seq)
    }

    /// Mark the queue terminal and wake every blocked cursor
    ///
    /// Buffered packets stay readable until drained. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Closed {
            return;
        }
        inner.state = QueueState::Closed;
        let cursors = inner.cursors.len();
        drop(inner);

        tracing::debug!(cursors = cursors, "Queue closed");
        self.notify.notify_waiters();
    }

    /// Cursor positioned at the most recent retained keyframe
    ///
    /// With no keyframe retained yet, the cursor starts at the next packet
    /// and skips ahead to the first keyframe it sees.
    pub fn latest(self: &Arc<Self>) -> Cursor {
        let mut inner = self.inner.lock();
        let position = inner.window.latest_boundary().unwrap_or(inner.window.tail());
        self.register_cursor(&mut inner, position)
    }

    /// Cursor positioned at the oldest retained keyframe
    pub fn oldest(self: &Arc<Self>) -> Cursor {
        let mut inner = self.inner.lock();
        let position = inner.window.oldest_boundary().unwrap_or(inner.window.tail());
        self.register_cursor(&mut inner, position)
    }

    fn register_cursor(self: &Arc<Self>, inner: &mut Inner, position: u64) -> Cursor {
        let id = inner.next_cursor_id;
        inner.next_cursor_id += 1;
        inner.cursors.insert(id, position);

        tracing::debug!(cursor = id, position = position, cursors = inner.cursors.len(), "Cursor attached");

        Cursor::new(Arc::clone(self), id, position)
    }

    /// Forget a cursor and reclaim the packets only it was holding
    pub(crate) fn release_cursor(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.cursors.remove(&id).is_none() {
            return;
        }
        let pinned = inner.slowest_cursor();
        let dropped = inner.window.trim(&self.config, pinned);

        tracing::debug!(cursor = id, cursors = inner.cursors.len(), reclaimed = dropped, "Cursor released");
    }

    /// The header, if written
    pub fn header(&self) -> Option<CodecSet> {
        self.inner.lock().header.clone()
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    /// Number of live cursors
    pub fn cursor_count(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            state: inner.state,
            packets_written: inner.packets_written,
            bytes_written: inner.bytes_written,
            keyframes: inner.keyframes,
            retained_packets: inner.window.len(),
            retained_bytes: inner.window.bytes(),
            cursors: inner.cursors.len(),
        }
    }
}

// `Sink` is not imported in this module: in scope, `queue.write_packet(..)`
// on an `Arc<Queue>` resolves to the async trait method.
impl av::Sink for Arc<Queue> {
    async fn write_header(&mut self, streams: &CodecSet) -> Result<()> {
        Queue::write_header(self, streams.clone())?;
        Ok(())
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        Queue::write_packet(self, packet.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::av::{AudioCodecType, AudioParams, Rational, StreamInfo, VideoCodecType, VideoParams};

    fn av_header() -> CodecSet {
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

    fn video(ms: u64, keyframe: bool) -> Packet {
        Packet::new(0, Duration::from_millis(ms), keyframe, Bytes::from_static(b"v"))
    }

    fn audio(ms: u64) -> Packet {
        Packet::new(1, Duration::from_millis(ms), false, Bytes::from_static(b"a"))
    }

    #[test]
    fn test_state_machine() {
        let queue = Queue::new();
        assert_eq!(queue.state(), QueueState::Empty);

        assert_eq!(queue.write_packet(video(0, true)), Err(QueueError::InvalidState));

        queue.write_header(av_header()).unwrap();
        assert_eq!(queue.state(), QueueState::HeaderWritten);
        assert_eq!(queue.write_header(av_header()), Err(QueueError::HeaderAlreadyWritten));

        assert_eq!(queue.write_packet(video(0, true)), Ok(0));
        assert_eq!(queue.write_packet(audio(10)), Ok(1));
        assert_eq!(queue.state(), QueueState::Streaming);

        queue.close();
        queue.close();
        assert_eq!(queue.state(), QueueState::Closed);
        assert_eq!(queue.write_packet(video(33, false)), Err(QueueError::QueueClosed));
    }

    #[test]
    fn test_rejects_unknown_stream_index() {
        let queue = Queue::new();
        queue.write_header(av_header()).unwrap();

        let packet = Packet::new(5, Duration::ZERO, true, Bytes::new());
        assert_eq!(
            queue.write_packet(packet),
            Err(QueueError::InvalidStreamIndex { index: 5, streams: 2 })
        );
    }

    #[test]
    fn test_audio_only_packets_are_boundaries() {
        let queue = Queue::new();
        queue
            .write_header(CodecSet::new(vec![StreamInfo::Audio(AudioParams::new(
                AudioCodecType::Aac,
                48000,
                2,
            ))]))
            .unwrap();

        for i in 0..5 {
            queue
                .write_packet(Packet::new(0, Duration::from_millis(i * 21), false, Bytes::new()))
                .unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.keyframes, 5);
        assert_eq!(stats.retained_packets, 2);
    }

    #[test]
    fn test_cursor_release_reclaims_packets() {
        let queue = Queue::with_config(QueueConfig::default().max_gop_count(1));
        queue.write_header(av_header()).unwrap();

        let cursor = queue.latest();
        for gop in 0..3 {
            queue.write_packet(video(gop * 1000, true)).unwrap();
            queue.write_packet(video(gop * 1000 + 33, false)).unwrap();
        }

        // The idle cursor pins everything from sequence 0
        assert_eq!(queue.stats().retained_packets, 6);
        assert_eq!(queue.cursor_count(), 1);

        drop(cursor);
        let stats = queue.stats();
        assert_eq!(stats.cursors, 0);
        assert_eq!(stats.retained_packets, 2);
    }

    #[test]
    fn test_debug_output() {
        let queue = Queue::new();
        queue.write_header(av_header()).unwrap();
        let _cursor = queue.latest();

        let debug = format!("{:?}", queue);
        assert!(debug.starts_with("Queue"));
        assert!(debug.contains("HeaderWritten"));
        assert!(debug.contains("cursors: 1"));
    }

    #[test]
    fn test_stats_counters() {
        let queue = Queue::new();
        queue.write_header(av_header()).unwrap();
        queue.write_packet(video(0, true)).unwrap();
        queue.write_packet(audio(5)).unwrap();
        queue.write_packet(video(33, false)).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.packets_written, 3);
        assert_eq!(stats.bytes_written, 3);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.state, QueueState::Streaming);
    }
}
