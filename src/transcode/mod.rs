//! Transcode bridge
//!
//! [`Transcoder`] wraps a publisher's [`Source`] and is itself a `Source`.
//! Each video stream is either passed through byte-for-byte or run through
//! a decode → convert → encode session picked by a [`CodecPolicy`]. Audio
//! always passes through.
//!
//! ```text
//!   source ──► read_packet ─┬─ audio / passthrough video ──────────────► out
//!                           └─ video ─► decoder ─► scale::convert ─► encoder ─► out
//! ```
//!
//! Sessions are set up inside `streams()`. A missing decoder or encoder
//! fails there with `CodecUnsupported`, before any packet is produced.

pub mod codec;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod options;
pub mod policy;
pub mod raw;
pub mod scale;

pub use codec::{VideoDecoder, VideoEncoder};
pub use options::TranscodeOptions;
pub use policy::{CodecPolicy, CodecRegistry, DecoderFactory, EncoderFactory};

use std::collections::VecDeque;
use std::sync::Arc;

use crate::av::{CodecSet, Packet, Source, StreamInfo, VideoFrame, VideoParams};
use crate::error::{Error, Result};

/// Decoder, encoder and target parameters for one video stream
pub struct TranscodeSession {
    decoder: Box<dyn VideoDecoder>,
    encoder: Box<dyn VideoEncoder>,
    output: VideoParams,
    frames: u64,
}

impl TranscodeSession {
    /// Configure an encoder from the source stream and the fixed options
    pub fn open(
        source: &VideoParams,
        options: &TranscodeOptions,
        policy: &dyn CodecPolicy,
    ) -> Result<Self> {
        let (decoder, mut encoder) = policy.find(source, options.codec)?;

        encoder.set_framerate(source.framerate);
        encoder.set_gop_size(options.gop_size(source.framerate));
        encoder.set_resolution(options.width, options.height);
        encoder.set_pixel_format(options.pixel_format)?;
        encoder.set_bitrate(options.bitrate);
        let output = encoder.open()?;

        Ok(Self {
            decoder,
            encoder,
            output,
            frames: 0,
        })
    }

    /// Declared parameters of the encoded stream
    pub fn output(&self) -> &VideoParams {
        &self.output
    }

    /// Frames encoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<Packet>> {
        let (width, height, pixel_format) = self.encoder.input_format();
        let frame = scale::convert(frame, width, height, pixel_format)?;
        self.frames += 1;
        self.encoder.encode(&frame)
    }

    fn process(&mut self, packet: &Packet) -> Result<Vec<Packet>> {
        match self.decoder.decode(packet)? {
            Some(frame) => self.encode(&frame),
            None => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        for frame in self.decoder.flush()? {
            out.extend(self.encode(&frame)?);
        }
        out.extend(self.encoder.flush()?);
        Ok(out)
    }
}

/// Source adaptor converting video to the configured target codec
pub struct Transcoder<S> {
    source: S,
    policy: Arc<dyn CodecPolicy>,
    options: TranscodeOptions,
    /// Indexed by stream; `None` means passthrough
    sessions: Vec<Option<TranscodeSession>>,
    pending: VecDeque<Packet>,
    streams: Option<CodecSet>,
    finished: bool,
}

impl<S: Source> Transcoder<S> {
    pub fn new(source: S, policy: Arc<dyn CodecPolicy>, options: TranscodeOptions) -> Self {
        Self {
            source,
            policy,
            options,
            sessions: Vec::new(),
            pending: VecDeque::new(),
            streams: None,
            finished: false,
        }
    }

    /// Whether any stream is being re-encoded
    ///
    /// Only meaningful after `streams()`.
    pub fn is_transcoding(&self) -> bool {
        self.sessions.iter().any(Option::is_some)
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn needs_session(&self, params: &VideoParams) -> bool {
        self.options.enabled && (self.options.force || params.codec != self.options.codec)
    }

    fn setup(&mut self, input: &CodecSet) -> Result<CodecSet> {
        let mut sessions = Vec::with_capacity(input.len());
        let mut output = Vec::with_capacity(input.len());

        for (index, stream) in input.streams().iter().enumerate() {
            match stream {
                StreamInfo::Video(params) if self.needs_session(params) => {
                    let session =
                        TranscodeSession::open(params, &self.options, self.policy.as_ref())?;

                    tracing::info!(
                        stream = index,
                        from = %params.codec,
                        to = %session.output().codec,
                        width = session.output().width,
                        height = session.output().height,
                        bitrate = ?session.output().bitrate,
                        gop = ?session.output().gop_size,
                        "Transcoding video stream"
                    );

                    output.push(StreamInfo::Video(session.output().clone()));
                    sessions.push(Some(session));
                }
                other => {
                    tracing::debug!(stream = index, "Stream passthrough");
                    output.push(other.clone());
                    sessions.push(None);
                }
            }
        }

        self.sessions = sessions;
        Ok(CodecSet::new(output))
    }

    fn flush_sessions(&mut self) -> Result<()> {
        for (index, session) in self.sessions.iter_mut().enumerate() {
            if let Some(session) = session {
                for mut packet in session.flush()? {
                    packet.stream_index = index;
                    self.pending.push_back(packet);
                }
            }
        }
        Ok(())
    }
}

impl<S: Source> Source for Transcoder<S> {
    async fn streams(&mut self) -> Result<CodecSet> {
        if let Some(streams) = &self.streams {
            return Ok(streams.clone());
        }

        let input = self.source.streams().await?;
        let output = self.setup(&input)?;
        self.streams = Some(output.clone());
        Ok(output)
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.streams.is_none() {
            return Err(Error::Codec("read_packet called before streams".into()));
        }

        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }

            let Some(packet) = self.source.read_packet().await? else {
                self.finished = true;
                self.flush_sessions()?;
                continue;
            };

            match self.sessions.get_mut(packet.stream_index) {
                Some(Some(session)) => {
                    for mut out in session.process(&packet)? {
                        out.stream_index = packet.stream_index;
                        self.pending.push_back(out);
                    }
                }
                _ => return Ok(Some(packet)),
            }
        }
    }
}
