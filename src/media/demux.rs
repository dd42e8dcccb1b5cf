//! FLV demuxer
//!
//! Reads an FLV byte stream and yields a [`CodecSet`] followed by packets.
//! Stream parameters are probed from the first tags: `onMetaData` for
//! resolution and frame rate, sequence headers for codec configuration,
//! and tag flags for everything else.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::av::{
    AudioCodecType, AudioParams, CodecSet, Packet, Rational, Source, StreamInfo, VideoCodecType,
    VideoParams,
};
use crate::error::{Error, MediaError, Result};

use super::aac::{AacPacketType, AudioSpecificConfig};
use super::flv::{
    AudioFormat, AudioSampleRate, FlvHeader, FlvTag, FlvTagHeader, FlvTagType, VideoCodec,
    VideoFrameType, FLV_HEADER_SIZE, MAX_TAG_DATA_SIZE, PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE,
};
use super::h264::{AvcConfig, AvcPacketType};
use super::metadata::Metadata;

/// Tags read before giving up on a stream announced in the header
const PROBE_TAGS: usize = 16;

#[derive(Debug, Default)]
struct VideoProbe {
    codec: Option<VideoCodecType>,
    extradata: Bytes,
}

#[derive(Debug, Default)]
struct AudioProbe {
    codec: Option<AudioCodecType>,
    sample_rate: u32,
    channels: u8,
    extradata: Bytes,
}

/// [`Source`] over any FLV byte stream
pub struct FlvDemuxer<R> {
    reader: R,
    streams: Option<CodecSet>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    /// Media tags read while probing
    probed: VecDeque<FlvTag>,
    eof: bool,
    tags: u64,
}

impl<R: AsyncRead + Unpin + Send> FlvDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            streams: None,
            video_index: None,
            audio_index: None,
            probed: VecDeque::new(),
            eof: false,
            tags: 0,
        }
    }

    /// Tags read so far
    pub fn tags_read(&self) -> u64 {
        self.tags
    }

    async fn read_header(&mut self) -> Result<FlvHeader> {
        let mut raw = [0u8; FLV_HEADER_SIZE];
        self.reader
            .read_exact(&mut raw)
            .await
            .map_err(|e| eof_as(e, MediaError::InvalidFlvHeader))?;
        let header = FlvHeader::parse(&raw)?;

        // Skip any header extension and PreviousTagSize0
        let skip = FlvHeader::extra_len(&raw) + PREVIOUS_TAG_SIZE;
        let mut rest = vec![0u8; skip];
        self.reader
            .read_exact(&mut rest)
            .await
            .map_err(|e| eof_as(e, MediaError::InvalidFlvHeader))?;

        Ok(header)
    }

    /// Next tag, or `None` at a clean end of stream
    async fn read_tag(&mut self) -> Result<Option<FlvTag>> {
        loop {
            if self.eof {
                return Ok(None);
            }

            let mut raw = [0u8; TAG_HEADER_SIZE];
            let n = read_full(&mut self.reader, &mut raw).await?;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            if n < TAG_HEADER_SIZE {
                return Err(MediaError::InvalidFlvTag.into());
            }

            let header = FlvTagHeader::parse(&raw);
            if header.data_size > MAX_TAG_DATA_SIZE {
                return Err(MediaError::InvalidFlvTag.into());
            }

            let mut data = BytesMut::zeroed(header.data_size);
            self.reader
                .read_exact(&mut data)
                .await
                .map_err(|e| eof_as(e, MediaError::InvalidFlvTag))?;

            // The back-pointer may be missing on a truncated final tag
            let mut prev = [0u8; PREVIOUS_TAG_SIZE];
            if read_full(&mut self.reader, &mut prev).await? < PREVIOUS_TAG_SIZE {
                self.eof = true;
            }

            self.tags += 1;

            match header.tag_type {
                Some(tag_type) => {
                    return Ok(Some(FlvTag {
                        tag_type,
                        timestamp: header.timestamp,
                        data: data.freeze(),
                    }))
                }
                None => {
                    tracing::trace!(tag = raw[0], size = header.data_size, "Skipping unknown FLV tag");
                }
            }
        }
    }

    async fn probe(&mut self) -> Result<CodecSet> {
        let header = self.read_header().await?;
        let mut meta = Metadata::default();
        let mut video = VideoProbe::default();
        let mut audio = AudioProbe::default();

        for _ in 0..PROBE_TAGS {
            let video_done = !header.has_video || video.codec.is_some();
            let audio_done = !header.has_audio || audio.codec.is_some();
            let found_any = video.codec.is_some() || audio.codec.is_some();
            if video_done && audio_done && found_any {
                break;
            }

            let Some(tag) = self.read_tag().await? else {
                break;
            };

            match tag.tag_type {
                FlvTagType::Script => {
                    match Metadata::parse(tag.data.clone()) {
                        Ok(Some(parsed)) => meta = parsed,
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed script tag"),
                    }
                }
                FlvTagType::Video => {
                    probe_video(&tag, &mut video);
                    if !tag.is_sequence_header() {
                        self.probed.push_back(tag);
                    }
                }
                FlvTagType::Audio => {
                    probe_audio(&tag, &mut audio)?;
                    if !tag.is_sequence_header() {
                        self.probed.push_back(tag);
                    }
                }
            }
        }

        let mut streams = Vec::new();

        if let Some(codec) = video.codec {
            let framerate = meta.framerate.map(Rational::from_f64).unwrap_or(Rational::new(0, 1));
            let mut params = VideoParams::new(
                codec,
                meta.width.unwrap_or(0.0) as u32,
                meta.height.unwrap_or(0.0) as u32,
                framerate,
            );
            params.bitrate = meta
                .video_data_rate
                .filter(|rate| *rate > 0.0)
                .map(|kbps| (kbps * 1000.0) as u32);
            params.extradata = video.extradata;

            self.video_index = Some(streams.len());
            streams.push(StreamInfo::Video(params));
        }

        if let Some(codec) = audio.codec {
            let mut params = AudioParams::new(codec, audio.sample_rate, audio.channels);
            params.extradata = audio.extradata;

            self.audio_index = Some(streams.len());
            streams.push(StreamInfo::Audio(params));
        }

        if streams.is_empty() {
            return Err(MediaError::InvalidFlvTag.into());
        }

        tracing::debug!(
            streams = streams.len(),
            has_video = self.video_index.is_some(),
            has_audio = self.audio_index.is_some(),
            probed = self.probed.len(),
            "FLV streams probed"
        );

        Ok(CodecSet::new(streams))
    }

    /// Convert a media tag to a packet; `None` for tags that carry none
    fn packet(&self, tag: FlvTag) -> Option<Packet> {
        let time = Duration::from_millis(tag.timestamp as u64);

        match tag.tag_type {
            FlvTagType::Video => {
                let index = self.video_index?;
                let codec = tag.video_codec()?;
                let frame_type = tag.video_frame_type()?;
                if frame_type == VideoFrameType::VideoInfoFrame {
                    return None;
                }

                if codec.has_packet_type() {
                    if tag.data.len() < 5 || tag.avc_packet_type() != Some(AvcPacketType::Nalu) {
                        // Sequence header repeats and end-of-sequence markers
                        return None;
                    }
                    let cts = composition_time(&tag.data[2..5]);
                    Some(
                        Packet::new(index, time, frame_type.is_keyframe(), tag.data.slice(5..))
                            .with_composition_time(cts),
                    )
                } else {
                    Some(Packet::new(index, time, frame_type.is_keyframe(), tag.data.slice(1..)))
                }
            }
            FlvTagType::Audio => {
                let index = self.audio_index?;
                let format = tag.audio_format()?;
                if format == AudioFormat::Aac {
                    if tag.aac_packet_type() != Some(AacPacketType::Raw) {
                        return None;
                    }
                    Some(Packet::new(index, time, false, tag.data.slice(2..)))
                } else {
                    Some(Packet::new(index, time, false, tag.data.slice(1..)))
                }
            }
            FlvTagType::Script => None,
        }
    }
}

fn probe_video(tag: &FlvTag, video: &mut VideoProbe) {
    let Some(codec) = tag.video_codec() else {
        return;
    };

    if video.codec.is_none() {
        video.codec = codec.codec_type();
    }

    if tag.is_sequence_header() && tag.data.len() > 5 {
        video.extradata = tag.data.slice(5..);
        if codec == VideoCodec::Avc {
            match AvcConfig::parse(video.extradata.clone()) {
                Ok(config) => tracing::debug!(
                    profile = config.profile_name(),
                    level = %config.level_string(),
                    sps = config.sps.len(),
                    pps = config.pps.len(),
                    "AVC sequence header"
                ),
                Err(e) => tracing::warn!(error = %e, "Unparseable AVC sequence header"),
            }
        }
    }
}

fn probe_audio(tag: &FlvTag, audio: &mut AudioProbe) -> Result<()> {
    let Some(format) = tag.audio_format() else {
        return Ok(());
    };
    let flags = tag.data[0];

    if audio.codec.is_none() {
        audio.codec = format.codec_type();
        audio.sample_rate = format
            .fixed_rate()
            .unwrap_or_else(|| AudioSampleRate::from_byte(flags).to_hz());
        audio.channels = if flags & 0x01 != 0 { 2 } else { 1 };
    }

    if tag.is_sequence_header() {
        let config = AudioSpecificConfig::parse(tag.data.slice(2..))?;
        tracing::debug!(
            profile = config.profile().map(|p| p.name()).unwrap_or("unknown"),
            sample_rate = config.sampling_frequency,
            channels = config.channels(),
            "AAC sequence header"
        );
        audio.sample_rate = config.sampling_frequency;
        if config.channels() > 0 {
            audio.channels = config.channels();
        }
        audio.extradata = config.raw;
    }

    Ok(())
}

/// Signed 24-bit composition offset in milliseconds; negative offsets clamp to zero
fn composition_time(bytes: &[u8]) -> Duration {
    let raw = i32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
    let cts = (raw << 8) >> 8;
    Duration::from_millis(cts.max(0) as u64)
}

/// Read until `buf` is full or the stream ends; returns bytes read
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn eof_as(e: std::io::Error, media: MediaError) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        media.into()
    } else {
        e.into()
    }
}

impl<R: AsyncRead + Unpin + Send> Source for FlvDemuxer<R> {
    async fn streams(&mut self) -> Result<CodecSet> {
        if let Some(streams) = &self.streams {
            return Ok(streams.clone());
        }
        let streams = self.probe().await?;
        self.streams = Some(streams.clone());
        Ok(streams)
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.streams.is_none() {
            self.streams().await?;
        }

        loop {
            let tag = match self.probed.pop_front() {
                Some(tag) => tag,
                None => match self.read_tag().await? {
                    Some(tag) => tag,
                    None => return Ok(None),
                },
            };

            if let Some(packet) = self.packet(tag) {
                return Ok(Some(packet));
            }
        }
    }
}
