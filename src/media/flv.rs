//! FLV container primitives
//!
//! FLV File Structure:
//! ```text
//! +------------+----------------+-------+----------------+-------+---
//! | Header (9) | PrevTagSize0(4)| Tag 1 | PrevTagSize1(4)| Tag 2 | ...
//! +------------+----------------+-------+----------------+-------+---
//! ```
//!
//! FLV Tag Structure:
//! ```text
//! +--------+-------------+-----------+-------------+---------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) |
//! +--------+-------------+-----------+-------------+---------+
//! ```
//!
//! Video Tag Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! Audio Tag Data:
//! ```text
//! +----------+----------+----------+----------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  |
//! +----------+----------+----------+----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::av::{AudioCodecType, AudioParams, VideoCodecType};
use crate::error::MediaError;

use super::aac::AacPacketType;
use super::h264::AvcPacketType;

/// Size of the file header
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of the back-pointer after every tag
pub const PREVIOUS_TAG_SIZE: usize = 4;

/// Upper bound on a tag body (24-bit size field)
pub const MAX_TAG_DATA_SIZE: usize = 0xFF_FFFF;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        // Upper bits are reserved / filter flag
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// File header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub has_audio: bool,
    pub has_video: bool,
}

impl FlvHeader {
    /// Parse the 9-byte file header
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < FLV_HEADER_SIZE || &data[..3] != b"FLV" || data[3] != 1 {
            return Err(MediaError::InvalidFlvHeader);
        }

        let offset = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        if (offset as usize) < FLV_HEADER_SIZE {
            return Err(MediaError::InvalidFlvHeader);
        }

        Ok(Self {
            has_audio: data[4] & 0x04 != 0,
            has_video: data[4] & 0x01 != 0,
        })
    }

    /// Bytes between the start of the file and the first tag header
    /// beyond the standard 9-byte header
    pub fn extra_len(data: &[u8]) -> usize {
        if data.len() < FLV_HEADER_SIZE {
            return 0;
        }
        let offset = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;
        offset.saturating_sub(FLV_HEADER_SIZE)
    }

    /// Write the header followed by PreviousTagSize0
    pub fn write(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.has_audio {
            flags |= 0x04;
        }
        if self.has_video {
            flags |= 0x01;
        }

        buf.put_slice(b"FLV");
        buf.put_u8(1);
        buf.put_u8(flags);
        buf.put_u32(FLV_HEADER_SIZE as u32);
        buf.put_u32(0);
    }
}

/// Parsed tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvTagHeader {
    /// `None` for tag types the relay does not know
    pub tag_type: Option<FlvTagType>,
    pub data_size: usize,
    /// Timestamp in milliseconds
    pub timestamp: u32,
}

impl FlvTagHeader {
    pub fn parse(data: &[u8; TAG_HEADER_SIZE]) -> Self {
        let data_size = u32::from_be_bytes([0, data[1], data[2], data[3]]) as usize;
        // 24-bit timestamp followed by its upper 8 bits
        let timestamp = u32::from_be_bytes([data[7], data[4], data[5], data[6]]);

        Self {
            tag_type: FlvTagType::from_byte(data[0]),
            data_size,
            timestamp,
        }
    }
}

/// One FLV tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (including codec headers)
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Sorenson H.263
    SorensonH263 = 2,
    /// Screen video
    ScreenVideo = 3,
    /// VP6
    Vp6 = 4,
    /// VP6 with alpha
    Vp6Alpha = 5,
    /// Screen video v2
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265), non-standard id used by many CDNs
    Hevc = 12,
    /// AV1, non-standard id
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    /// Stream codec this id maps to
    pub fn codec_type(&self) -> Option<VideoCodecType> {
        match self {
            VideoCodec::SorensonH263 => Some(VideoCodecType::H263),
            VideoCodec::Vp6 | VideoCodec::Vp6Alpha => Some(VideoCodecType::Vp6),
            VideoCodec::Avc => Some(VideoCodecType::H264),
            VideoCodec::Hevc => Some(VideoCodecType::H265),
            VideoCodec::Av1 => Some(VideoCodecType::Av1),
            VideoCodec::ScreenVideo | VideoCodec::ScreenVideoV2 => None,
        }
    }

    /// FLV id for a stream codec; `None` if FLV cannot carry it
    pub fn from_codec_type(codec: VideoCodecType) -> Option<Self> {
        match codec {
            VideoCodecType::H263 => Some(VideoCodec::SorensonH263),
            VideoCodecType::Vp6 => Some(VideoCodec::Vp6),
            VideoCodecType::H264 => Some(VideoCodec::Avc),
            VideoCodecType::H265 => Some(VideoCodec::Hevc),
            VideoCodecType::Av1 => Some(VideoCodec::Av1),
            VideoCodecType::RawVideo => None,
        }
    }

    /// Whether tag bodies carry a packet type and composition time
    pub fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc | VideoCodec::Av1)
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Linear PCM, platform endian
    LinearPcmPlatform = 0,
    /// ADPCM
    Adpcm = 1,
    /// MP3
    Mp3 = 2,
    /// Linear PCM, little endian
    LinearPcmLe = 3,
    /// Nellymoser 16kHz mono
    Nellymoser16kMono = 4,
    /// Nellymoser 8kHz mono
    Nellymoser8kMono = 5,
    /// Nellymoser
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    /// AAC
    Aac = 10,
    /// Speex
    Speex = 11,
    /// MP3 8kHz
    Mp38k = 14,
    /// Device-specific sound
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }

    pub fn codec_type(&self) -> Option<AudioCodecType> {
        match self {
            AudioFormat::LinearPcmPlatform | AudioFormat::LinearPcmLe => Some(AudioCodecType::Pcm),
            AudioFormat::Mp3 | AudioFormat::Mp38k => Some(AudioCodecType::Mp3),
            AudioFormat::Nellymoser16kMono
            | AudioFormat::Nellymoser8kMono
            | AudioFormat::Nellymoser => Some(AudioCodecType::Nellymoser),
            AudioFormat::G711ALaw => Some(AudioCodecType::PcmAlaw),
            AudioFormat::G711MuLaw => Some(AudioCodecType::PcmMulaw),
            AudioFormat::Aac => Some(AudioCodecType::Aac),
            AudioFormat::Speex => Some(AudioCodecType::Speex),
            AudioFormat::Adpcm | AudioFormat::DeviceSpecific => None,
        }
    }

    pub fn from_codec_type(codec: AudioCodecType) -> Self {
        match codec {
            AudioCodecType::Aac => AudioFormat::Aac,
            AudioCodecType::Mp3 => AudioFormat::Mp3,
            AudioCodecType::Speex => AudioFormat::Speex,
            AudioCodecType::Nellymoser => AudioFormat::Nellymoser,
            AudioCodecType::Pcm => AudioFormat::LinearPcmLe,
            AudioCodecType::PcmAlaw => AudioFormat::G711ALaw,
            AudioCodecType::PcmMulaw => AudioFormat::G711MuLaw,
        }
    }

    /// Sample rate implied by the format itself, overriding the rate bits
    pub fn fixed_rate(&self) -> Option<u32> {
        match self {
            AudioFormat::Nellymoser16kMono | AudioFormat::Speex => Some(16000),
            AudioFormat::Nellymoser8kMono | AudioFormat::Mp38k => Some(8000),
            AudioFormat::G711ALaw | AudioFormat::G711MuLaw => Some(8000),
            _ => None,
        }
    }
}

/// Audio sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleRate {
    Rate5512 = 0,
    Rate11025 = 1,
    Rate22050 = 2,
    Rate44100 = 3,
}

impl AudioSampleRate {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 2) & 0x03 {
            0 => AudioSampleRate::Rate5512,
            1 => AudioSampleRate::Rate11025,
            2 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    /// Closest representable rate at or below `hz`
    pub fn from_hz(hz: u32) -> Self {
        match hz {
            0..=11024 => AudioSampleRate::Rate5512,
            11025..=22049 => AudioSampleRate::Rate11025,
            22050..=44099 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    pub fn to_hz(&self) -> u32 {
        match self {
            AudioSampleRate::Rate5512 => 5512,
            AudioSampleRate::Rate11025 => 11025,
            AudioSampleRate::Rate22050 => 22050,
            AudioSampleRate::Rate44100 => 44100,
        }
    }
}

/// First byte of every audio tag for a stream
///
/// AAC always signals 44.1 kHz stereo; the real values live in the
/// AudioSpecificConfig.
pub fn audio_flags(params: &AudioParams) -> u8 {
    let format = AudioFormat::from_codec_type(params.codec);
    if format == AudioFormat::Aac {
        return 0xAF;
    }

    let rate = AudioSampleRate::from_hz(params.sample_rate) as u8;
    let size = 1; // 16-bit
    let stereo = u8::from(params.channels >= 2);
    ((format as u8) << 4) | (rate << 2) | (size << 1) | stereo
}

impl FlvTag {
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn script(data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Script,
            timestamp: 0,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    /// For video tags, get the frame type
    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For video tags, get the codec
    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.is_video() && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For audio tags, get the format
    pub fn audio_format(&self) -> Option<AudioFormat> {
        if self.is_audio() && !self.data.is_empty() {
            AudioFormat::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For AVC/HEVC/AV1 video tags, the packet type byte
    pub fn avc_packet_type(&self) -> Option<AvcPacketType> {
        if self.video_codec()?.has_packet_type() && self.data.len() >= 2 {
            AvcPacketType::from_byte(self.data[1])
        } else {
            None
        }
    }

    /// For AAC audio tags, the packet type byte
    pub fn aac_packet_type(&self) -> Option<AacPacketType> {
        if self.audio_format()? == AudioFormat::Aac && self.data.len() >= 2 {
            AacPacketType::from_byte(self.data[1])
        } else {
            None
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// Whether this tag carries codec configuration rather than media
    ///
    /// True for AVC/HEVC/AV1 sequence headers and AAC sequence headers.
    pub fn is_sequence_header(&self) -> bool {
        match self.tag_type {
            FlvTagType::Video => self.avc_packet_type() == Some(AvcPacketType::SequenceHeader),
            FlvTagType::Audio => self.aac_packet_type() == Some(AacPacketType::SequenceHeader),
            FlvTagType::Script => false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Append tag header, body and the trailing PreviousTagSize
    pub fn write(&self, buf: &mut BytesMut) -> Result<(), MediaError> {
        if self.data.len() > MAX_TAG_DATA_SIZE {
            return Err(MediaError::InvalidFlvTag);
        }

        let size = self.data.len() as u32;
        let ts = self.timestamp;

        buf.reserve(TAG_HEADER_SIZE + self.data.len() + PREVIOUS_TAG_SIZE);
        buf.put_u8(self.tag_type.as_byte());
        buf.put_slice(&size.to_be_bytes()[1..]);
        buf.put_slice(&ts.to_be_bytes()[1..]);
        buf.put_u8((ts >> 24) as u8);
        buf.put_slice(&[0, 0, 0]); // stream id
        buf.put_slice(&self.data);
        buf.put_u32(size + TAG_HEADER_SIZE as u32);
        Ok(())
    }
}
