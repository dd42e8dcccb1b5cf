//! Decoder/encoder selection
//!
//! The transcode bridge asks a [`CodecPolicy`] for a matching pair once per
//! video stream at session start. [`CodecRegistry`] is the table-driven
//! implementation: codecs are registered as factories keyed by codec id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::av::{VideoCodecType, VideoParams};
use crate::error::{Error, Result};

use super::codec::{VideoDecoder, VideoEncoder};
use super::raw::{RawDecoder, RawEncoder};

/// Builds a decoder for a source stream
pub type DecoderFactory =
    Arc<dyn Fn(&VideoParams) -> Result<Box<dyn VideoDecoder>> + Send + Sync>;

/// Builds an unconfigured encoder
pub type EncoderFactory = Arc<dyn Fn() -> Result<Box<dyn VideoEncoder>> + Send + Sync>;

/// Chooses the codecs for one transcode session
pub trait CodecPolicy: Send + Sync {
    /// Return a decoder for `source` and an encoder producing `target`
    ///
    /// Fails with `CodecUnsupported` if either side is unavailable.
    fn find(
        &self,
        source: &VideoParams,
        target: VideoCodecType,
    ) -> Result<(Box<dyn VideoDecoder>, Box<dyn VideoEncoder>)>;
}

/// Factory table of available codecs
#[derive(Clone, Default)]
pub struct CodecRegistry {
    decoders: HashMap<VideoCodecType, DecoderFactory>,
    encoders: HashMap<VideoCodecType, EncoderFactory>,
}

impl CodecRegistry {
    /// Empty registry: every transcode request fails
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the codecs implemented in this crate (`rawvideo`)
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_decoder(VideoCodecType::RawVideo, |params| {
            Ok(Box::new(RawDecoder::new(params)?) as Box<dyn VideoDecoder>)
        });
        registry.register_encoder(VideoCodecType::RawVideo, || {
            Ok(Box::new(RawEncoder::new()) as Box<dyn VideoEncoder>)
        });
        registry
    }

    /// Builtin codecs plus everything libavcodec offers
    ///
    /// Decoders cover H.263, VP6, H.264, H.265 and AV1 where the linked
    /// libavcodec has them; encoders likewise (typically libx264 for H.264).
    #[cfg(feature = "ffmpeg")]
    pub fn with_ffmpeg() -> Self {
        use super::ffmpeg::{self, FfmpegDecoder, FfmpegEncoder};

        let mut registry = Self::with_builtin();
        if let Err(e) = ffmpeg::init() {
            tracing::warn!(error = %e, "libav init failed, only builtin codecs available");
            return registry;
        }

        for codec in [
            VideoCodecType::H263,
            VideoCodecType::Vp6,
            VideoCodecType::H264,
            VideoCodecType::H265,
            VideoCodecType::Av1,
        ] {
            if ffmpeg::has_decoder(codec) {
                registry.register_decoder(codec, |params| {
                    Ok(Box::new(FfmpegDecoder::new(params)?) as Box<dyn VideoDecoder>)
                });
            }
            if ffmpeg::has_encoder(codec) {
                registry.register_encoder(codec, move || {
                    Ok(Box::new(FfmpegEncoder::new(codec)?) as Box<dyn VideoEncoder>)
                });
            }
        }

        tracing::debug!(registry = ?registry, "libavcodec codecs registered");
        registry
    }

    /// Every codec compiled into this build
    ///
    /// [`with_ffmpeg`](Self::with_ffmpeg) with the `ffmpeg` feature,
    /// [`with_builtin`](Self::with_builtin) without it.
    pub fn with_available() -> Self {
        #[cfg(feature = "ffmpeg")]
        {
            Self::with_ffmpeg()
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            Self::with_builtin()
        }
    }

    pub fn register_decoder<F>(&mut self, codec: VideoCodecType, factory: F)
    where
        F: Fn(&VideoParams) -> Result<Box<dyn VideoDecoder>> + Send + Sync + 'static,
    {
        self.decoders.insert(codec, Arc::new(factory));
    }

    pub fn register_encoder<F>(&mut self, codec: VideoCodecType, factory: F)
    where
        F: Fn() -> Result<Box<dyn VideoEncoder>> + Send + Sync + 'static,
    {
        self.encoders.insert(codec, Arc::new(factory));
    }

    pub fn has_decoder(&self, codec: VideoCodecType) -> bool {
        self.decoders.contains_key(&codec)
    }

    pub fn has_encoder(&self, codec: VideoCodecType) -> bool {
        self.encoders.contains_key(&codec)
    }
}

impl CodecPolicy for CodecRegistry {
    fn find(
        &self,
        source: &VideoParams,
        target: VideoCodecType,
    ) -> Result<(Box<dyn VideoDecoder>, Box<dyn VideoEncoder>)> {
        let decoder = self
            .decoders
            .get(&source.codec)
            .ok_or_else(|| Error::no_decoder(source.codec))?;
        let encoder = self
            .encoders
            .get(&target)
            .ok_or_else(|| Error::no_encoder(target))?;

        Ok((decoder(source)?, encoder()?))
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("decoders", &self.decoders.keys().collect::<Vec<_>>())
            .field("encoders", &self.encoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{PixelFormat, Rational};

    fn raw_source() -> VideoParams {
        let mut params = VideoParams::new(VideoCodecType::RawVideo, 8, 8, Rational::new(25, 1));
        params.pixel_format = Some(PixelFormat::I420);
        params
    }

    #[test]
    fn test_empty_registry_rejects() {
        let registry = CodecRegistry::new();
        let err = registry.find(&raw_source(), VideoCodecType::RawVideo).err().unwrap();
        assert!(matches!(err, Error::CodecUnsupported(ref msg) if msg.contains("decoder")));
    }

    #[test]
    fn test_builtin_rawvideo() {
        let registry = CodecRegistry::with_builtin();
        assert!(registry.has_decoder(VideoCodecType::RawVideo));
        assert!(registry.has_encoder(VideoCodecType::RawVideo));
        assert!(registry.find(&raw_source(), VideoCodecType::RawVideo).is_ok());
    }

    #[test]
    fn test_missing_encoder() {
        let registry = CodecRegistry::with_builtin();
        let err = registry.find(&raw_source(), VideoCodecType::H264).err().unwrap();
        assert!(matches!(err, Error::CodecUnsupported(ref msg) if msg.contains("encoder") && msg.contains("H.264")));
    }

    #[test]
    fn test_available_includes_builtin() {
        let registry = CodecRegistry::with_available();
        assert!(registry.has_decoder(VideoCodecType::RawVideo));
        assert!(registry.has_encoder(VideoCodecType::RawVideo));
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn test_ffmpeg_registers_linked_codecs() {
        let registry = CodecRegistry::with_ffmpeg();
        assert_eq!(
            registry.has_decoder(VideoCodecType::H264),
            crate::transcode::ffmpeg::has_decoder(VideoCodecType::H264)
        );
        assert_eq!(
            registry.has_encoder(VideoCodecType::H264),
            crate::transcode::ffmpeg::has_encoder(VideoCodecType::H264)
        );
    }

    #[test]
    fn test_missing_decoder() {
        let registry = CodecRegistry::with_builtin();
        let source = VideoParams::new(VideoCodecType::Vp6, 320, 240, Rational::new(30, 1));
        let err = registry.find(&source, VideoCodecType::RawVideo).err().unwrap();
        assert!(matches!(err, Error::CodecUnsupported(ref msg) if msg.contains("VP6")));
    }
}
