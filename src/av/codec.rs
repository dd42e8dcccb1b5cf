//! Stream descriptors
//!
//! A publisher declares its streams once, before any packet flows. The
//! resulting [`CodecSet`] is shared by every reader of the channel and never
//! changes for the lifetime of a publish session.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;

/// Video codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecType {
    /// Sorenson H.263
    H263,
    /// On2 VP6
    Vp6,
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// AV1
    Av1,
    /// Uncompressed planar frames
    #[serde(rename = "rawvideo")]
    RawVideo,
}

impl fmt::Display for VideoCodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoCodecType::H263 => "H.263",
            VideoCodecType::Vp6 => "VP6",
            VideoCodecType::H264 => "H.264",
            VideoCodecType::H265 => "H.265",
            VideoCodecType::Av1 => "AV1",
            VideoCodecType::RawVideo => "rawvideo",
        };
        f.write_str(name)
    }
}

/// Audio codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodecType {
    Aac,
    Mp3,
    Speex,
    Nellymoser,
    /// Linear PCM
    Pcm,
    /// G.711 A-law
    PcmAlaw,
    /// G.711 mu-law
    PcmMulaw,
}

impl fmt::Display for AudioCodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioCodecType::Aac => "AAC",
            AudioCodecType::Mp3 => "MP3",
            AudioCodecType::Speex => "Speex",
            AudioCodecType::Nellymoser => "Nellymoser",
            AudioCodecType::Pcm => "PCM",
            AudioCodecType::PcmAlaw => "G.711 A-law",
            AudioCodecType::PcmMulaw => "G.711 mu-law",
        };
        f.write_str(name)
    }
}

/// Raw picture layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling
    I420,
    /// Planar Y followed by interleaved UV, 2x2 chroma subsampling
    Nv12,
}

impl PixelFormat {
    /// Number of bytes in one picture of this format
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma = chroma_dim(width) * chroma_dim(height);
        match self {
            PixelFormat::I420 | PixelFormat::Nv12 => luma + 2 * chroma,
        }
    }
}

/// Size of a 2x-subsampled chroma dimension
pub(crate) fn chroma_dim(n: u32) -> usize {
    (n as usize + 1) / 2
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::I420 => f.write_str("yuv420p"),
            PixelFormat::Nv12 => f.write_str("nv12"),
        }
    }
}

/// Rational number, used for frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whole frames per unit (integer division, 0 when undefined)
    pub fn whole(&self) -> u32 {
        if self.den == 0 {
            0
        } else {
            self.num / self.den
        }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Approximate a floating point rate (as found in FLV metadata)
    pub fn from_f64(rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::new(0, 1);
        }
        let rounded = rate.round();
        if (rate - rounded).abs() < 0.001 {
            Self::new(rounded as u32, 1)
        } else {
            Self::new((rate * 1000.0).round() as u32, 1000)
        }
    }
}

/// Video stream descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub codec: VideoCodecType,
    pub width: u32,
    pub height: u32,
    /// Raw layout (known for raw codecs and encoder outputs)
    pub pixel_format: Option<PixelFormat>,
    pub framerate: Rational,
    /// Target bitrate in bits per second
    pub bitrate: Option<u32>,
    /// Frames per group of pictures
    pub gop_size: Option<u32>,
    /// Codec configuration record (e.g. AVCDecoderConfigurationRecord)
    pub extradata: Bytes,
}

impl VideoParams {
    pub fn new(codec: VideoCodecType, width: u32, height: u32, framerate: Rational) -> Self {
        Self {
            codec,
            width,
            height,
            pixel_format: None,
            framerate,
            bitrate: None,
            gop_size: None,
            extradata: Bytes::new(),
        }
    }
}

/// Audio stream descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub codec: AudioCodecType,
    pub sample_rate: u32,
    pub channels: u8,
    /// Codec configuration record (e.g. AudioSpecificConfig)
    pub extradata: Bytes,
}

impl AudioParams {
    pub fn new(codec: AudioCodecType, sample_rate: u32, channels: u8) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            extradata: Bytes::new(),
        }
    }
}

/// One entry of a [`CodecSet`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamInfo {
    Video(VideoParams),
    Audio(AudioParams),
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        matches!(self, StreamInfo::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, StreamInfo::Audio(_))
    }

    pub fn as_video(&self) -> Option<&VideoParams> {
        match self {
            StreamInfo::Video(v) => Some(v),
            StreamInfo::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioParams> {
        match self {
            StreamInfo::Audio(a) => Some(a),
            StreamInfo::Video(_) => None,
        }
    }
}

/// Ordered, immutable list of stream descriptors
///
/// Cheap to clone: all clones share one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSet {
    streams: Arc<[StreamInfo]>,
}

impl CodecSet {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self {
            streams: streams.into(),
        }
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn get(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.get(index)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Whether any stream carries video
    pub fn has_video(&self) -> bool {
        self.streams.iter().any(StreamInfo::is_video)
    }

    /// Whether any stream carries audio
    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(StreamInfo::is_audio)
    }

    /// Index of the first video stream
    pub fn video_index(&self) -> Option<usize> {
        self.streams.iter().position(StreamInfo::is_video)
    }

    /// Index of the first audio stream
    pub fn audio_index(&self) -> Option<usize> {
        self.streams.iter().position(StreamInfo::is_audio)
    }
}
