//! Core media types shared by every component
//!
//! - Stream descriptors ([`CodecSet`], [`StreamInfo`])
//! - Compressed [`Packet`]s and decoded [`VideoFrame`]s
//! - The [`Source`]/[`Sink`] traits the copy pipeline is generic over

pub mod codec;
pub mod frame;
pub mod io;
pub mod packet;

pub use codec::{
    AudioCodecType, AudioParams, CodecSet, PixelFormat, Rational, StreamInfo, VideoCodecType,
    VideoParams,
};
pub use frame::VideoFrame;
pub use io::{Sink, Source};
pub use packet::Packet;
