//! Relay configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [http]
//! bind_addr = "0.0.0.0:8089"
//! file_source = "/srv/media/movie.flv"
//!
//! [queue]
//! max_gop_count = 2
//!
//! [transcode]
//! enabled = true
//! codec = "h264"
//! bitrate = 1000000
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::queue::QueueConfig;
use crate::transcode::TranscodeOptions;

/// HTTP surface options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// FLV file served at `GET /file`; the route is absent when unset
    pub file_source: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8089)),
            file_source: None,
        }
    }
}

/// Relay configuration options
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub http: HttpConfig,

    /// Retention limits applied to every channel's queue
    pub queue: QueueConfig,

    /// Encoder options for the transcode bridge
    pub transcode: TranscodeOptions,
}

impl RelayConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits the builders would have clamped
    pub fn validate(&self) -> Result<()> {
        self.queue.validate().map_err(Error::Config)?;
        self.transcode.validate().map_err(Error::Config)?;
        Ok(())
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self::default().bind(addr)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.http.bind_addr = addr;
        self
    }

    /// Serve a local FLV file at `GET /file`
    pub fn file_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.http.file_source = Some(path.into());
        self
    }

    /// Set queue retention limits
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set transcode options
    pub fn transcode(mut self, transcode: TranscodeOptions) -> Self {
        self.transcode = transcode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::VideoCodecType;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.http.bind_addr.port(), 8089);
        assert!(config.http.file_source.is_none());
        assert_eq!(config.queue, QueueConfig::default());
        assert!(!config.transcode.enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(RelayConfig::from_toml("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn test_full_toml() {
        let config = RelayConfig::from_toml(
            r#"
            [http]
            bind_addr = "127.0.0.1:9000"
            file_source = "/tmp/movie.flv"

            [queue]
            max_gop_count = 3

            [transcode]
            enabled = true
            codec = "rawvideo"
            width = 640
            "#,
        )
        .unwrap();

        assert_eq!(config.http.bind_addr.port(), 9000);
        assert_eq!(config.http.file_source, Some(PathBuf::from("/tmp/movie.flv")));
        assert_eq!(config.queue.max_gop_count, 3);
        assert_eq!(config.queue.max_buffer_packets, QueueConfig::default().max_buffer_packets);
        assert!(config.transcode.enabled);
        assert_eq!(config.transcode.codec, VideoCodecType::RawVideo);
        assert_eq!(config.transcode.width, 640);
        assert_eq!(config.transcode.height, 240);
    }

    #[test]
    fn test_invalid_toml() {
        let err = RelayConfig::from_toml("[http]\nbind_addr = 12").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = RelayConfig::from_toml("[queue]\nmax_gop_count = 0").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("max_gop_count")));

        let err = RelayConfig::from_toml("[transcode]\ngop_multiplier = 0").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("gop_multiplier")));
    }

    #[test]
    fn test_missing_file() {
        let err = RelayConfig::load("/nonexistent/avrelay.toml").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("/nonexistent/avrelay.toml")));
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = RelayConfig::with_addr(addr)
            .file_source("/srv/movie.flv")
            .queue(QueueConfig::new().max_gop_count(4))
            .transcode(TranscodeOptions::default().bitrate(500_000));

        assert_eq!(config.http.bind_addr, addr);
        assert_eq!(config.http.file_source, Some(PathBuf::from("/srv/movie.flv")));
        assert_eq!(config.queue.max_gop_count, 4);
        assert_eq!(config.transcode.bitrate, 500_000);
    }
}
