//! Codecs backed by libavcodec
//!
//! Compiled with the `ffmpeg` feature. Packets cross the boundary with
//! microsecond timestamps. H.264 output is re-framed from Annex B to AVCC,
//! and its global header becomes an AVCDecoderConfigurationRecord, so the
//! encoded stream can go straight into an FLV muxer.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, Id};
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as AvFrame;

use crate::av::{Packet, PixelFormat, Rational, VideoCodecType, VideoFrame, VideoParams};
use crate::error::{Error, Result};
use crate::media::h264::{annexb_to_avcc, AvcConfig};

use super::codec::{VideoDecoder, VideoEncoder};

const TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

/// Initialize libav once; later calls are no-ops
pub fn init() -> Result<()> {
    ffmpeg::init().map_err(|e| av_error("init", e))
}

/// libavcodec id for a codec, `None` for ones handled in-crate
fn codec_id(codec: VideoCodecType) -> Option<Id> {
    match codec {
        VideoCodecType::H263 => Some(Id::FLV1),
        VideoCodecType::Vp6 => Some(Id::VP6F),
        VideoCodecType::H264 => Some(Id::H264),
        VideoCodecType::H265 => Some(Id::HEVC),
        VideoCodecType::Av1 => Some(Id::AV1),
        VideoCodecType::RawVideo => None,
    }
}

/// Whether libavcodec in this build can decode `codec`
pub fn has_decoder(codec: VideoCodecType) -> bool {
    codec_id(codec).and_then(ffmpeg::decoder::find).is_some()
}

/// Whether libavcodec in this build can encode `codec`
pub fn has_encoder(codec: VideoCodecType) -> bool {
    codec_id(codec).and_then(ffmpeg::encoder::find).is_some()
}

fn av_error(context: &str, e: ffmpeg::Error) -> Error {
    Error::Codec(format!("{}: {}", context, e))
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

fn micros(d: Duration) -> i64 {
    d.as_micros().min(i64::MAX as u128) as i64
}

fn from_micros(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

fn av_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::I420 => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

/// Copy `rows` rows of `width` bytes out of a strided plane
fn read_plane(out: &mut BytesMut, plane: &[u8], stride: usize, width: usize, rows: usize) {
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&plane[start..start + width]);
    }
}

/// Copy a packed plane into a strided one
fn write_plane(plane: &mut [u8], stride: usize, data: &[u8], width: usize, rows: usize) {
    for row in 0..rows {
        plane[row * stride..row * stride + width]
            .copy_from_slice(&data[row * width..(row + 1) * width]);
    }
}

/// Decoder for any codec libavcodec knows
pub struct FfmpegDecoder {
    codec: VideoCodecType,
    decoder: ffmpeg::decoder::Video,
    frame: AvFrame,
    ready: VecDeque<VideoFrame>,
}

impl FfmpegDecoder {
    pub fn new(params: &VideoParams) -> Result<Self> {
        init()?;
        let av_codec = codec_id(params.codec)
            .and_then(ffmpeg::decoder::find)
            .ok_or_else(|| Error::no_decoder(params.codec))?;

        let mut context = codec::Context::new_with_codec(av_codec);
        if !params.extradata.is_empty() {
            set_extradata(&mut context, &params.extradata)?;
        }
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| av_error("open decoder", e))?;

        tracing::debug!(codec = %params.codec, "libavcodec decoder opened");

        Ok(Self {
            codec: params.codec,
            decoder,
            frame: AvFrame::empty(),
            ready: VecDeque::new(),
        })
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => {
                    let frame = picture(&self.frame)?;
                    self.ready.push_back(frame);
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(av_error("decode", e)),
            }
        }
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>> {
        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_dts(Some(micros(packet.time)));
        av_packet.set_pts(Some(micros(packet.time + packet.composition_time)));

        self.decoder
            .send_packet(&av_packet)
            .map_err(|e| av_error("decode", e))?;
        self.drain()?;

        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        self.decoder
            .send_eof()
            .map_err(|e| av_error("decoder flush", e))?;
        self.drain()?;

        tracing::trace!(codec = %self.codec, frames = self.ready.len(), "Decoder flushed");
        Ok(self.ready.drain(..).collect())
    }
}

/// Attach a codec configuration record to an unopened context
fn set_extradata(context: &mut codec::Context, data: &[u8]) -> Result<()> {
    let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    // SAFETY: the buffer comes from av_mallocz with the padding libavcodec
    // requires, and the context takes ownership (freed with the context).
    unsafe {
        let buf = ffmpeg::ffi::av_mallocz(data.len() + padding) as *mut u8;
        if buf.is_null() {
            return Err(Error::Codec("out of memory for extradata".into()));
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());

        let ctx = context.as_mut_ptr();
        (*ctx).extradata = buf;
        (*ctx).extradata_size = data.len() as i32;
    }
    Ok(())
}

/// Convert a decoded picture to a packed frame
fn picture(frame: &AvFrame) -> Result<VideoFrame> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let (cw, ch) = ((width + 1) / 2, (height + 1) / 2);

    let pixel_format = match frame.format() {
        Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::I420,
        Pixel::NV12 => PixelFormat::Nv12,
        other => {
            return Err(Error::Codec(format!(
                "decoder produced unsupported layout {:?}",
                other
            )))
        }
    };

    let mut data = BytesMut::with_capacity(pixel_format.frame_size(width as u32, height as u32));
    read_plane(&mut data, frame.data(0), frame.stride(0), width, height);
    match pixel_format {
        PixelFormat::I420 => {
            read_plane(&mut data, frame.data(1), frame.stride(1), cw, ch);
            read_plane(&mut data, frame.data(2), frame.stride(2), cw, ch);
        }
        PixelFormat::Nv12 => {
            read_plane(&mut data, frame.data(1), frame.stride(1), cw * 2, ch);
        }
    }

    let time = from_micros(frame.timestamp().or(frame.pts()).unwrap_or(0));
    Ok(VideoFrame::new(
        width as u32,
        height as u32,
        pixel_format,
        time,
        data.freeze(),
    )?)
}

/// Encoder for any codec libavcodec can produce
pub struct FfmpegEncoder {
    codec: VideoCodecType,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    framerate: Rational,
    bitrate: u32,
    gop_size: u32,
    encoder: Option<ffmpeg::encoder::video::Encoder>,
    packet: ffmpeg::Packet,
}

impl FfmpegEncoder {
    pub fn new(codec: VideoCodecType) -> Result<Self> {
        init()?;
        if !has_encoder(codec) {
            return Err(Error::no_encoder(codec));
        }
        Ok(Self {
            codec,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::I420,
            framerate: Rational::new(25, 1),
            bitrate: 1_000_000,
            gop_size: 25,
            encoder: None,
            packet: ffmpeg::Packet::empty(),
        })
    }

    fn drain(&mut self) -> Result<Vec<Packet>> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Error::Codec(format!("{} encoder used before open", self.codec)));
        };

        let mut out = Vec::new();
        loop {
            match encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    let Some(data) = self.packet.data() else {
                        continue;
                    };
                    let data = if self.codec == VideoCodecType::H264 {
                        annexb_to_avcc(data)
                    } else {
                        Bytes::copy_from_slice(data)
                    };

                    let dts = self.packet.dts().or(self.packet.pts()).unwrap_or(0);
                    let pts = self.packet.pts().unwrap_or(dts);
                    out.push(
                        Packet::new(0, from_micros(dts), self.packet.is_key(), data)
                            .with_composition_time(from_micros(pts - dts)),
                    );
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) if is_again(&e) => break,
                Err(e) => return Err(av_error("encode", e)),
            }
        }
        Ok(out)
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn set_framerate(&mut self, framerate: Rational) {
        if framerate.whole() > 0 {
            self.framerate = framerate;
        }
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
        self.bitrate = bitrate;
    }

    fn set_gop_size(&mut self, gop_size: u32) {
        self.gop_size = gop_size.max(1);
    }

    fn open(&mut self) -> Result<VideoParams> {
        let av_codec = codec_id(self.codec)
            .and_then(ffmpeg::encoder::find)
            .ok_or_else(|| Error::no_encoder(self.codec))?;

        let mut encoder = codec::Context::new_with_codec(av_codec)
            .encoder()
            .video()
            .map_err(|e| av_error("create encoder", e))?;

        let rate = ffmpeg::Rational(self.framerate.num as i32, self.framerate.den.max(1) as i32);
        encoder.set_width(self.width);
        encoder.set_height(self.height);
        encoder.set_format(av_pixel(self.pixel_format));
        encoder.set_time_base(TIME_BASE);
        encoder.set_frame_rate(Some(rate));
        encoder.set_bit_rate(self.bitrate as usize);
        encoder.set_gop(self.gop_size);
        encoder.set_max_b_frames(0);
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);

        let encoder = encoder
            .open_as(av_codec)
            .map_err(|e| av_error("open encoder", e))?;

        let extradata = global_header(&encoder);
        let extradata = if self.codec == VideoCodecType::H264 && !extradata.is_empty() {
            AvcConfig::from_annexb(&extradata)?.to_bytes()
        } else {
            extradata
        };

        tracing::debug!(
            codec = %self.codec,
            width = self.width,
            height = self.height,
            bitrate = self.bitrate,
            gop = self.gop_size,
            "libavcodec encoder opened"
        );
        self.encoder = Some(encoder);

        let mut params = VideoParams::new(self.codec, self.width, self.height, self.framerate);
        params.pixel_format = Some(self.pixel_format);
        params.bitrate = Some(self.bitrate);
        params.gop_size = Some(self.gop_size);
        params.extradata = extradata;
        Ok(params)
    }

    fn input_format(&self) -> (u32, u32, PixelFormat) {
        (self.width, self.height, self.pixel_format)
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<Packet>> {
        let (cw, ch) = (frame.chroma_width(), frame.chroma_height());
        let (width, height) = (frame.width as usize, frame.height as usize);

        let mut av_frame = AvFrame::new(av_pixel(frame.pixel_format), frame.width, frame.height);
        let luma_stride = av_frame.stride(0);
        write_plane(av_frame.data_mut(0), luma_stride, frame.luma(), width, height);
        match frame.pixel_format {
            PixelFormat::I420 => {
                let (u, v) = frame.chroma().split_at(cw * ch);
                let stride = av_frame.stride(1);
                write_plane(av_frame.data_mut(1), stride, u, cw, ch);
                let stride = av_frame.stride(2);
                write_plane(av_frame.data_mut(2), stride, v, cw, ch);
            }
            PixelFormat::Nv12 => {
                let stride = av_frame.stride(1);
                write_plane(av_frame.data_mut(1), stride, frame.chroma(), cw * 2, ch);
            }
        }
        av_frame.set_pts(Some(micros(frame.time)));

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Error::Codec(format!("{} encoder used before open", self.codec)));
        };
        encoder
            .send_frame(&av_frame)
            .map_err(|e| av_error("encode", e))?;
        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder
                .send_eof()
                .map_err(|e| av_error("encoder flush", e))?;
            return self.drain();
        }
        Ok(Vec::new())
    }
}

/// Copy the global header an opened encoder produced
fn global_header(encoder: &ffmpeg::encoder::video::Encoder) -> Bytes {
    // SAFETY: extradata and extradata_size are owned by the open context and
    // stay valid while it is borrowed.
    unsafe {
        let ctx = encoder.as_ptr();
        let size = (*ctx).extradata_size;
        if (*ctx).extradata.is_null() || size <= 0 {
            return Bytes::new();
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts((*ctx).extradata, size as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32, ms: u64) -> VideoFrame {
        let size = PixelFormat::I420.frame_size(width, height);
        VideoFrame::new(
            width,
            height,
            PixelFormat::I420,
            Duration::from_millis(ms),
            Bytes::from(vec![0x80; size]),
        )
        .unwrap()
    }

    #[test]
    fn test_plane_copy_honours_stride() {
        let plane = [1, 2, 0, 0, 3, 4, 0, 0];
        let mut out = BytesMut::new();
        read_plane(&mut out, &plane, 4, 2, 2);
        assert_eq!(out.as_ref(), &[1, 2, 3, 4]);

        let mut back = [0u8; 8];
        write_plane(&mut back, 4, &out, 2, 2);
        assert_eq!(back, plane);
    }

    #[test]
    fn test_rawvideo_left_to_builtin() {
        assert_eq!(codec_id(VideoCodecType::RawVideo), None);
        assert!(!has_encoder(VideoCodecType::RawVideo));
    }

    #[test]
    fn test_h264_round_trip() {
        init().unwrap();
        if !has_encoder(VideoCodecType::H264) || !has_decoder(VideoCodecType::H264) {
            return;
        }

        let mut encoder = FfmpegEncoder::new(VideoCodecType::H264).unwrap();
        encoder.set_framerate(Rational::new(25, 1));
        encoder.set_resolution(64, 48);
        encoder.set_gop_size(5);
        encoder.set_bitrate(200_000);
        let params = encoder.open().unwrap();

        // AVCDecoderConfigurationRecord, ready for an FLV sequence header
        let config = AvcConfig::parse(params.extradata.clone()).unwrap();
        assert_eq!(config.nalu_length_size, 4);

        let mut packets = Vec::new();
        for i in 0..10 {
            packets.extend(encoder.encode(&gray_frame(64, 48, i * 40)).unwrap());
        }
        packets.extend(encoder.flush().unwrap());
        assert_eq!(packets.len(), 10);
        assert!(packets[0].is_keyframe);
        assert!(packets.iter().filter(|p| p.is_keyframe).count() >= 2);

        let mut decoder = FfmpegDecoder::new(&params).unwrap();
        let mut frames = Vec::new();
        for packet in &packets {
            frames.extend(decoder.decode(packet).unwrap());
        }
        frames.extend(decoder.flush().unwrap());

        assert_eq!(frames.len(), 10);
        assert_eq!((frames[0].width, frames[0].height), (64, 48));
        assert_eq!(frames[9].time, Duration::from_millis(360));
    }
}
