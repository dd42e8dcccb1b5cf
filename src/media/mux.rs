//! FLV muxer
//!
//! Serializes a [`CodecSet`] and packets as an FLV byte stream onto any
//! `AsyncWrite`: file header, `onMetaData`, sequence headers, then one tag
//! per packet. Every tag is flushed as soon as it is written so live
//! players see frames without buffering delay.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::av::{CodecSet, Packet, Sink, StreamInfo};
use crate::error::{Error, Result};

use super::aac::AacPacketType;
use super::flv::{self, AudioFormat, FlvHeader, FlvTag, VideoCodec};
use super::h264::AvcPacketType;
use super::metadata::Metadata;

/// How packets of one stream are framed
#[derive(Debug, Clone, Copy)]
enum Track {
    Video(VideoCodec),
    Audio { flags: u8, aac: bool },
    /// FLV carries one stream of each kind; extras are dropped
    Ignored,
}

/// [`Sink`] writing FLV
pub struct FlvMuxer<W> {
    writer: W,
    tracks: Vec<Track>,
    buf: BytesMut,
    tags: u64,
}

impl<W: AsyncWrite + Unpin + Send> FlvMuxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            tracks: Vec::new(),
            buf: BytesMut::with_capacity(64 * 1024),
            tags: 0,
        }
    }

    /// Tags written, including header tags
    pub fn tags_written(&self) -> u64 {
        self.tags
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn plan(streams: &CodecSet) -> Result<Vec<Track>> {
        let mut tracks = Vec::with_capacity(streams.len());
        let mut has_video = false;
        let mut has_audio = false;

        for stream in streams.streams() {
            let track = match stream {
                StreamInfo::Video(_) if has_video => Track::Ignored,
                StreamInfo::Audio(_) if has_audio => Track::Ignored,
                StreamInfo::Video(v) => {
                    let codec = VideoCodec::from_codec_type(v.codec).ok_or_else(|| {
                        Error::CodecUnsupported(format!("FLV cannot carry {}", v.codec))
                    })?;
                    has_video = true;
                    Track::Video(codec)
                }
                StreamInfo::Audio(a) => {
                    has_audio = true;
                    Track::Audio {
                        flags: flv::audio_flags(a),
                        aac: AudioFormat::from_codec_type(a.codec) == AudioFormat::Aac,
                    }
                }
            };
            tracks.push(track);
        }

        Ok(tracks)
    }

    async fn write_tag(&mut self, tag: &FlvTag) -> Result<()> {
        self.buf.clear();
        tag.write(&mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        self.tags += 1;
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin + Send> Sink for FlvMuxer<W> {
    async fn write_header(&mut self, streams: &CodecSet) -> Result<()> {
        self.tracks = Self::plan(streams)?;

        let header = FlvHeader {
            has_audio: self.tracks.iter().any(|t| matches!(t, Track::Audio { .. })),
            has_video: self.tracks.iter().any(|t| matches!(t, Track::Video(_))),
        };
        self.buf.clear();
        header.write(&mut self.buf);
        self.writer.write_all(&self.buf).await?;

        self.write_tag(&FlvTag::script(Metadata::from_streams(streams).encode()))
            .await?;

        for (track, stream) in self.tracks.clone().iter().zip(streams.streams()) {
            match (track, stream) {
                (Track::Video(codec), StreamInfo::Video(v))
                    if codec.has_packet_type() && !v.extradata.is_empty() =>
                {
                    let mut body = BytesMut::with_capacity(5 + v.extradata.len());
                    body.put_u8(0x10 | *codec as u8);
                    body.put_u8(AvcPacketType::SequenceHeader as u8);
                    body.put_slice(&[0, 0, 0]);
                    body.put_slice(&v.extradata);
                    self.write_tag(&FlvTag::video(0, body.freeze())).await?;
                }
                (Track::Audio { flags, aac: true }, StreamInfo::Audio(a)) if !a.extradata.is_empty() => {
                    let mut body = BytesMut::with_capacity(2 + a.extradata.len());
                    body.put_u8(*flags);
                    body.put_u8(AacPacketType::SequenceHeader as u8);
                    body.put_slice(&a.extradata);
                    self.write_tag(&FlvTag::audio(0, body.freeze())).await?;
                }
                _ => {}
            }
        }

        self.writer.flush().await?;

        tracing::debug!(
            has_video = header.has_video,
            has_audio = header.has_audio,
            "FLV header written"
        );
        Ok(())
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let track = self
            .tracks
            .get(packet.stream_index)
            .copied()
            .unwrap_or(Track::Ignored);
        let timestamp = packet.time_ms();

        let tag = match track {
            Track::Video(codec) => {
                let frame_type = if packet.is_keyframe { 1 } else { 2 };
                let mut body = BytesMut::with_capacity(5 + packet.size());
                body.put_u8((frame_type << 4) | codec as u8);
                if codec.has_packet_type() {
                    let cts = packet.composition_time.as_millis().min(0x7F_FFFF) as u32;
                    body.put_u8(AvcPacketType::Nalu as u8);
                    body.put_slice(&cts.to_be_bytes()[1..]);
                }
                body.put_slice(&packet.data);
                FlvTag::video(timestamp, body.freeze())
            }
            Track::Audio { flags, aac } => {
                let mut body = BytesMut::with_capacity(2 + packet.size());
                body.put_u8(flags);
                if aac {
                    body.put_u8(AacPacketType::Raw as u8);
                }
                body.put_slice(&packet.data);
                FlvTag::audio(timestamp, body.freeze())
            }
            Track::Ignored => {
                tracing::trace!(stream = packet.stream_index, "Dropping packet for unmapped stream");
                return Ok(());
            }
        };

        self.write_tag(&tag).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
