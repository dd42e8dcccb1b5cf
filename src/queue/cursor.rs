//! Per-subscriber read position into a [`Queue`]

use std::sync::Arc;

use crate::av::{CodecSet, Packet, Source};
use crate::error::Result;

use super::error::QueueError;
use super::Queue;

/// Result of a non-blocking read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Next packet in order
    Packet(Packet),
    /// Nothing new yet; the queue is still open
    WouldBlock,
    /// Queue closed and fully drained
    EndOfStream,
}

/// Independent reader of a channel's packet log
///
/// Cursors are not shared between subscribers. Dropping a cursor releases
/// its hold on old packets so the queue can reclaim them.
pub struct Cursor {
    queue: Arc<Queue>,
    id: u64,
    /// Sequence number of the next packet to read
    position: u64,
    /// Sequence number of the last packet delivered
    last_sequence: Option<u64>,
    /// Whether a keyframe boundary has been delivered since the last (re)start
    synced: bool,
    discontinuities: u64,
}

impl Cursor {
    pub(super) fn new(queue: Arc<Queue>, id: u64, position: u64) -> Self {
        Self {
            queue,
            id,
            position,
            last_sequence: None,
            synced: false,
            discontinuities: 0,
        }
    }

    /// Sequence number of the next packet this cursor will read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Sequence number of the last packet returned
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// How many times this cursor was force-advanced after falling behind
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    /// The queue this cursor reads from
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Read the next packet without waiting
    pub fn try_read(&mut self) -> ReadOutcome {
        let mut inner = self.queue.inner.lock();

        if self.position < inner.window.head() {
            let target = inner
                .window
                .latest_boundary()
                .unwrap_or_else(|| inner.window.tail());
            tracing::warn!(
                cursor = self.id,
                from = self.position,
                to = target,
                skipped = target - self.position,
                "Cursor fell behind retention window, skipping to latest keyframe"
            );
            self.position = target;
            self.synced = false;
            self.discontinuities += 1;
        }

        loop {
            let next = inner
                .window
                .get(self.position)
                .map(|(packet, boundary)| (packet.clone(), boundary));
            let Some((packet, boundary)) = next else {
                inner.update_cursor(self.id, self.position);
                return if inner.is_closed() {
                    ReadOutcome::EndOfStream
                } else {
                    ReadOutcome::WouldBlock
                };
            };

            let seq = self.position;
            self.position += 1;

            if !self.synced {
                if !boundary {
                    continue;
                }
                self.synced = true;
            }

            inner.update_cursor(self.id, self.position);
            self.last_sequence = Some(seq);
            return ReadOutcome::Packet(packet);
        }
    }

    /// Wait for the next packet
    ///
    /// Returns `None` once the queue is closed and every buffered packet has
    /// been read.
    pub async fn read(&mut self) -> Option<Packet> {
        let queue = Arc::clone(&self.queue);
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a write between the check and the
            // await is not missed
            notified.as_mut().enable();

            match self.try_read() {
                ReadOutcome::Packet(packet) => return Some(packet),
                ReadOutcome::EndOfStream => return None,
                ReadOutcome::WouldBlock => notified.await,
            }
        }
    }

    /// Wait for the header
    pub async fn header(&self) -> std::result::Result<CodecSet, QueueError> {
        let queue = Arc::clone(&self.queue);
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = queue.inner.lock();
                if let Some(header) = &inner.header {
                    return Ok(header.clone());
                }
                if inner.is_closed() {
                    return Err(QueueError::EndOfStream);
                }
            }

            notified.await;
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.queue.release_cursor(self.id);
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("discontinuities", &self.discontinuities)
            .finish()
    }
}

impl Source for Cursor {
    async fn streams(&mut self) -> Result<CodecSet> {
        Ok(self.header().await?)
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.read().await)
    }
}
