//! Retained packet window
//!
//! A sliding window over the channel's packet log. Every packet gets a
//! sequence number when it is pushed; the window keeps a contiguous range
//! `[head, tail)` of them plus the sequence numbers of the keyframe
//! boundaries inside that range, so a late joiner can start on a decodable
//! packet instead of replaying the whole history.

use std::collections::VecDeque;

use crate::av::Packet;

use super::config::QueueConfig;

#[derive(Debug)]
struct Entry {
    packet: Packet,
    boundary: bool,
}

/// Bounded window of recent packets
#[derive(Debug, Default)]
pub(crate) struct PacketWindow {
    entries: VecDeque<Entry>,
    /// Sequence number of `entries[0]`
    head: u64,
    /// Retained payload size in bytes
    bytes: usize,
    /// Sequence numbers of retained keyframe boundaries, ascending
    boundaries: VecDeque<u64>,
}

impl PacketWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the oldest retained packet
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Sequence number the next pushed packet will get
    pub fn tail(&self) -> u64 {
        self.head + self.entries.len() as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Append a packet, returning its sequence number
    pub fn push(&mut self, packet: Packet, boundary: bool) -> u64 {
        let seq = self.tail();
        self.bytes += packet.size();
        if boundary {
            self.boundaries.push_back(seq);
        }
        self.entries.push_back(Entry { packet, boundary });
        seq
    }

    /// Packet at `seq` and whether it starts a GOP
    pub fn get(&self, seq: u64) -> Option<(&Packet, bool)> {
        let index = seq.checked_sub(self.head)? as usize;
        self.entries.get(index).map(|e| (&e.packet, e.boundary))
    }

    /// Most recent keyframe boundary still retained
    pub fn latest_boundary(&self) -> Option<u64> {
        self.boundaries.back().copied()
    }

    /// Oldest keyframe boundary still retained
    pub fn oldest_boundary(&self) -> Option<u64> {
        self.boundaries.front().copied()
    }

    /// Drop packets that are no longer needed
    ///
    /// Packets older than the newest `max_gop_count` GOPs go first, but only
    /// up to `pinned` (the slowest live cursor). The hard byte and packet
    /// caps are then enforced regardless of cursors; the newest packet is
    /// always kept. Returns the number of packets dropped.
    pub fn trim(&mut self, config: &QueueConfig, pinned: Option<u64>) -> usize {
        let mut dropped = 0;

        let soft_target = if self.boundaries.len() > config.max_gop_count {
            let keep_from = self.boundaries.len() - config.max_gop_count.max(1);
            self.boundaries[keep_from]
        } else {
            // Everything before the first keyframe is useless to a joiner
            self.boundaries.front().copied().unwrap_or(self.head)
        };
        let soft_target = pinned.map_or(soft_target, |p| soft_target.min(p));

        while self.head < soft_target && self.pop_front() {
            dropped += 1;
        }

        while (self.bytes > config.max_buffer_bytes || self.entries.len() > config.max_buffer_packets)
            && self.entries.len() > 1
            && self.pop_front()
        {
            dropped += 1;
        }

        dropped
    }

    fn pop_front(&mut self) -> bool {
        let Some(entry) = self.entries.pop_front() else {
            return false;
        };

        self.bytes -= entry.packet.size();
        if entry.boundary && self.boundaries.front() == Some(&self.head) {
            self.boundaries.pop_front();
        }
        self.head += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn packet(ms: u64, keyframe: bool, size: usize) -> Packet {
        Packet::new(0, Duration::from_millis(ms), keyframe, Bytes::from(vec![0u8; size]))
    }

    fn config(gops: usize) -> QueueConfig {
        QueueConfig::default().max_gop_count(gops)
    }

    #[test]
    fn test_push_assigns_sequence_numbers() {
        let mut window = PacketWindow::new();

        assert_eq!(window.push(packet(0, true, 10), true), 0);
        assert_eq!(window.push(packet(33, false, 10), false), 1);
        assert_eq!(window.tail(), 2);
        assert_eq!(window.bytes(), 20);

        let (p, boundary) = window.get(0).unwrap();
        assert!(boundary);
        assert!(p.is_keyframe);
        assert!(window.get(2).is_none());
    }

    #[test]
    fn test_trim_keeps_newest_gops() {
        let mut window = PacketWindow::new();

        for gop in 0..4u64 {
            window.push(packet(gop * 100, true, 10), true);
            window.push(packet(gop * 100 + 33, false, 10), false);
        }

        let dropped = window.trim(&config(2), None);

        assert_eq!(dropped, 4);
        assert_eq!(window.head(), 4);
        assert_eq!(window.oldest_boundary(), Some(4));
        assert_eq!(window.latest_boundary(), Some(6));
    }

    #[test]
    fn test_trim_respects_pinned_cursor() {
        let mut window = PacketWindow::new();

        for gop in 0..4u64 {
            window.push(packet(gop * 100, true, 10), true);
            window.push(packet(gop * 100 + 33, false, 10), false);
        }

        // A cursor still needs packet 1
        window.trim(&config(1), Some(1));
        assert_eq!(window.head(), 1);
        assert!(window.get(0).is_none());
        assert!(window.get(1).is_some());
    }

    #[test]
    fn test_trim_hard_cap_ignores_pin() {
        let mut window = PacketWindow::new();
        let config = QueueConfig::default().max_buffer_packets(3);

        for i in 0..6u64 {
            window.push(packet(i * 33, i == 0, 10), i == 0);
        }

        window.trim(&config, Some(0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.head(), 3);
        // The only keyframe fell out of the window
        assert_eq!(window.latest_boundary(), None);
    }

    #[test]
    fn test_trim_byte_cap_keeps_last_packet() {
        let mut window = PacketWindow::new();
        let config = QueueConfig::default().max_buffer_bytes(100);

        window.push(packet(0, true, 60), true);
        window.push(packet(33, false, 500), false);

        window.trim(&config, None);
        assert_eq!(window.len(), 1);
        assert_eq!(window.head(), 1);
    }

    #[test]
    fn test_trim_drops_leading_non_keyframes() {
        let mut window = PacketWindow::new();

        window.push(packet(0, false, 10), false);
        window.push(packet(33, false, 10), false);
        window.push(packet(66, true, 10), true);

        window.trim(&config(2), None);
        assert_eq!(window.head(), 2);
        assert_eq!(window.oldest_boundary(), Some(2));
    }
}
