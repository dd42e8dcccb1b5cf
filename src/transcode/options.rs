//! Encoder configuration
//!
//! Fixed target parameters applied to every transcoded publish session.
//! Frame rate is always taken from the source.

use serde::Deserialize;

use crate::av::{PixelFormat, VideoCodecType};

/// Target parameters for video transcoding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    /// Run video through the transcode bridge at all
    pub enabled: bool,

    /// Output codec
    pub codec: VideoCodecType,

    pub width: u32,

    pub height: u32,

    pub pixel_format: PixelFormat,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// GOP size in seconds' worth of frames
    pub gop_multiplier: u32,

    /// Re-encode even when the source already uses the target codec
    pub force: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            codec: VideoCodecType::H264,
            width: 352,
            height: 240,
            pixel_format: PixelFormat::I420,
            bitrate: 1_000_000,
            gop_multiplier: 1,
            force: false,
        }
    }
}

impl TranscodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable transcoding to the given codec
    pub fn codec(mut self, codec: VideoCodecType) -> Self {
        self.enabled = true;
        self.codec = codec;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn gop_multiplier(mut self, multiplier: u32) -> Self {
        self.gop_multiplier = multiplier.max(1);
        self
    }

    /// Re-encode same-codec sources too
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// GOP size for a source frame rate, in frames
    ///
    /// Sources that declare no usable frame rate get one frame per GOP unit.
    pub fn gop_size(&self, framerate: crate::av::Rational) -> u32 {
        framerate.whole().max(1).saturating_mul(self.gop_multiplier.max(1))
    }

    /// Check values that bypassed the builder (e.g. deserialized ones)
    pub fn validate(&self) -> Result<(), String> {
        if self.gop_multiplier == 0 {
            return Err("transcode.gop_multiplier must be at least 1".into());
        }
        if self.enabled && (self.width == 0 || self.height == 0) {
            return Err(format!(
                "transcode resolution {}x{} is empty",
                self.width, self.height
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::Rational;

    #[test]
    fn test_defaults() {
        let options = TranscodeOptions::default();
        assert!(!options.enabled);
        assert_eq!((options.width, options.height), (352, 240));
        assert_eq!(options.bitrate, 1_000_000);
        assert_eq!(options.pixel_format, PixelFormat::I420);
    }

    #[test]
    fn test_gop_size_one_second() {
        let options = TranscodeOptions::new();
        assert_eq!(options.gop_size(Rational::new(30, 1)), 30);
        assert_eq!(options.gop_size(Rational::new(30000, 1001)), 29);
        assert_eq!(options.gop_size(Rational::new(0, 1)), 1);

        let options = options.gop_multiplier(2);
        assert_eq!(options.gop_size(Rational::new(25, 1)), 50);
    }

    #[test]
    fn test_gop_size_saturates() {
        let options = TranscodeOptions {
            gop_multiplier: u32::MAX,
            ..Default::default()
        };
        assert_eq!(options.gop_size(Rational::new(60, 1)), u32::MAX);
    }

    #[test]
    fn test_validate() {
        assert!(TranscodeOptions::default().validate().is_ok());

        let options: TranscodeOptions = toml::from_str("gop_multiplier = 0").unwrap();
        assert!(options.validate().unwrap_err().contains("gop_multiplier"));

        let options = TranscodeOptions::new()
            .codec(VideoCodecType::RawVideo)
            .resolution(0, 240);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_toml() {
        let options: TranscodeOptions = toml::from_str(
            r#"
            enabled = true
            codec = "rawvideo"
            pixel_format = "nv12"
            bitrate = 500000
            "#,
        )
        .unwrap();

        assert!(options.enabled);
        assert_eq!(options.codec, VideoCodecType::RawVideo);
        assert_eq!(options.pixel_format, PixelFormat::Nv12);
        assert_eq!(options.bitrate, 500_000);
        assert_eq!(options.width, 352);
    }
}
