//! Compressed media packets

use std::time::Duration;

use bytes::Bytes;

/// One compressed unit of a stream
///
/// Cheap to clone: the payload is reference counted, so fanning a packet
/// out to many cursors never copies media data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Index into the channel's `CodecSet`
    pub stream_index: usize,
    /// Decode timestamp
    pub time: Duration,
    /// Presentation offset from `time` (B-frames)
    pub composition_time: Duration,
    /// Whether the packet can be decoded without preceding packets
    pub is_keyframe: bool,
    /// Codec payload, container framing stripped
    pub data: Bytes,
}

impl Packet {
    /// Create a packet with no composition offset
    pub fn new(stream_index: usize, time: Duration, is_keyframe: bool, data: Bytes) -> Self {
        Self {
            stream_index,
            time,
            composition_time: Duration::ZERO,
            is_keyframe,
            data,
        }
    }

    /// Set the composition offset
    pub fn with_composition_time(mut self, cts: Duration) -> Self {
        self.composition_time = cts;
        self
    }

    /// Size of the payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Timestamp in whole milliseconds, as carried by FLV
    pub fn time_ms(&self) -> u32 {
        self.time.as_millis() as u32
    }
}
