//! Producer and consumer ends of a copy pipeline

use std::future::Future;

use super::codec::CodecSet;
use super::packet::Packet;
use crate::error::Result;

/// Something that yields a header and then packets
///
/// Implemented by demuxers, by the transcode bridge and by queue cursors.
pub trait Source: Send {
    /// Stream descriptors; must be called before `read_packet`
    fn streams(&mut self) -> impl Future<Output = Result<CodecSet>> + Send;

    /// Next packet, or `None` at end of stream
    fn read_packet(&mut self) -> impl Future<Output = Result<Option<Packet>>> + Send;
}

/// Something that accepts a header and then packets
///
/// Implemented by muxers and by the broadcast queue.
pub trait Sink: Send {
    fn write_header(&mut self, streams: &CodecSet) -> impl Future<Output = Result<()>> + Send;

    fn write_packet(&mut self, packet: &Packet) -> impl Future<Output = Result<()>> + Send;

    /// Finish the output once the source is exhausted
    fn write_trailer(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
