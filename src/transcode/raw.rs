//! `rawvideo` codec
//!
//! Each packet carries exactly one uncompressed picture in the stream's
//! pixel format. Every picture is intra-coded; the encoder still marks
//! keyframes on its GOP cadence so downstream retention and join logic see
//! regular boundaries.

use crate::av::{Packet, PixelFormat, Rational, VideoCodecType, VideoFrame, VideoParams};
use crate::error::{Error, Result};

/// Decoder for `rawvideo` packets
pub struct RawDecoder {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl RawDecoder {
    /// Build a decoder for a stream's declared layout
    pub fn new(params: &VideoParams) -> Result<Self> {
        if params.codec != VideoCodecType::RawVideo {
            return Err(Error::no_decoder(params.codec));
        }
        let pixel_format = params.pixel_format.unwrap_or(PixelFormat::I420);
        Ok(Self {
            width: params.width,
            height: params.height,
            pixel_format,
        })
    }
}

impl super::VideoDecoder for RawDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>> {
        let frame = VideoFrame::new(
            self.width,
            self.height,
            self.pixel_format,
            packet.time,
            packet.data.clone(),
        )?;
        Ok(Some(frame))
    }
}

/// Encoder producing `rawvideo` packets
pub struct RawEncoder {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    framerate: Rational,
    bitrate: Option<u32>,
    gop_size: u32,
    frames: u64,
    opened: bool,
}

impl RawEncoder {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::I420,
            framerate: Rational::new(0, 1),
            bitrate: None,
            gop_size: 1,
            frames: 0,
            opened: false,
        }
    }
}

impl Default for RawEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl super::VideoEncoder for RawEncoder {
    fn set_framerate(&mut self, framerate: Rational) {
        self.framerate = framerate;
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn set_pixel_format(&mut self, pixel_format: PixelFormat) -> Result<()> {
        self.pixel_format = pixel_format;
        Ok(())
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = Some(bitrate);
    }

    fn set_gop_size(&mut self, gop_size: u32) {
        self.gop_size = gop_size.max(1);
    }

    fn open(&mut self) -> Result<VideoParams> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Codec(format!(
                "rawvideo encoder: invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        self.opened = true;

        let mut params = VideoParams::new(
            VideoCodecType::RawVideo,
            self.width,
            self.height,
            self.framerate,
        );
        params.pixel_format = Some(self.pixel_format);
        params.bitrate = self.bitrate;
        params.gop_size = Some(self.gop_size);
        Ok(params)
    }

    fn input_format(&self) -> (u32, u32, PixelFormat) {
        (self.width, self.height, self.pixel_format)
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<Packet>> {
        if !self.opened {
            return Err(Error::Codec("rawvideo encoder used before open".into()));
        }
        if (frame.width, frame.height, frame.pixel_format) != self.input_format() {
            return Err(Error::Codec(format!(
                "rawvideo encoder: expected {}x{} {}, got {}x{} {}",
                self.width,
                self.height,
                self.pixel_format,
                frame.width,
                frame.height,
                frame.pixel_format
            )));
        }

        let keyframe = self.frames % self.gop_size as u64 == 0;
        self.frames += 1;

        Ok(vec![Packet::new(0, frame.time, keyframe, frame.data.clone())])
    }
}
