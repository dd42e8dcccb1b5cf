//! Decoder and encoder interfaces
//!
//! Codec work is CPU-bound and synchronous; the transcoder calls these
//! between awaits on its source.

use crate::av::{Packet, PixelFormat, Rational, VideoFrame, VideoParams};
use crate::error::Result;

/// Turns compressed packets of one stream into raw pictures
pub trait VideoDecoder: Send {
    /// Decode one packet
    ///
    /// Returns `None` while the decoder is buffering (e.g. reordering).
    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>>;

    /// Drain pictures still held after the last packet
    fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        Ok(Vec::new())
    }
}

/// Turns raw pictures into compressed packets of one codec
///
/// Configured once through the setters, then `open`ed. After `open` the
/// declared output parameters are fixed.
pub trait VideoEncoder: Send {
    fn set_framerate(&mut self, framerate: Rational);

    fn set_resolution(&mut self, width: u32, height: u32);

    fn set_pixel_format(&mut self, pixel_format: PixelFormat) -> Result<()>;

    /// Target bitrate in bits per second
    fn set_bitrate(&mut self, bitrate: u32);

    /// Frames between forced keyframes
    fn set_gop_size(&mut self, gop_size: u32);

    /// Validate the configuration and return the output stream descriptor
    fn open(&mut self) -> Result<VideoParams>;

    /// Resolution and layout `encode` expects
    fn input_format(&self) -> (u32, u32, PixelFormat);

    /// Encode one picture into zero or more packets
    ///
    /// Returned packets carry stream index 0; the caller re-indexes them.
    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<Packet>>;

    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}
