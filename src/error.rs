//! Unified error types for avrelay

use std::io;

use thiserror::Error;

use crate::av::VideoCodecType;
use crate::queue::QueueError;
use crate::registry::RegistryError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Channel registry failure (not found, already publishing)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Broadcast queue misuse
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Container or frame parsing error
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// No decoder or encoder available for the required codec pair
    #[error("Codec unsupported: {0}")]
    CodecUnsupported(String),

    /// Decoder or encoder failed while processing a frame
    #[error("Codec error: {0}")]
    Codec(String),

    /// Publisher side of a pipeline failed
    #[error("Upstream I/O error: {0}")]
    UpstreamIo(#[source] io::Error),

    /// Subscriber side of a pipeline failed
    #[error("Downstream I/O error: {0}")]
    DownstreamIo(#[source] io::Error),

    /// A restarted pipeline was fed a source with a different header
    #[error("Codec set mismatch on pipeline restart")]
    CodecSetMismatch,

    /// Unclassified I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `CodecUnsupported` error for a missing decoder
    pub fn no_decoder(codec: VideoCodecType) -> Self {
        Error::CodecUnsupported(format!("no decoder for {}", codec))
    }

    /// Build a `CodecUnsupported` error for a missing encoder
    pub fn no_encoder(codec: VideoCodecType) -> Self {
        Error::CodecUnsupported(format!("no encoder for {}", codec))
    }

    /// Reclassify a plain I/O error as a publisher-side failure
    pub fn upstream(self) -> Self {
        match self {
            Error::Io(e) => Error::UpstreamIo(e),
            other => other,
        }
    }

    /// Reclassify a plain I/O error as a subscriber-side failure
    pub fn downstream(self) -> Self {
        match self {
            Error::Io(e) => Error::DownstreamIo(e),
            other => other,
        }
    }

    /// Whether the error is the "channel absent" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Registry(RegistryError::NotFound(_)))
    }
}

/// Media parsing errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid FLV header")]
    InvalidFlvHeader,

    #[error("Invalid FLV tag")]
    InvalidFlvTag,

    #[error("Invalid AMF data")]
    InvalidAmf,

    #[error("Invalid AAC config")]
    InvalidAacConfig,

    #[error("Invalid AVC config")]
    InvalidAvcConfig,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unsupported pixel format conversion: {0}")]
    UnsupportedPixelFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = Error::Registry(RegistryError::NotFound("movie".into()));
        assert!(err.to_string().contains("Registry error"));
        assert!(err.to_string().contains("movie"));

        let err = Error::Queue(QueueError::HeaderAlreadyWritten);
        assert!(err.to_string().contains("Queue error"));

        let err = Error::no_decoder(VideoCodecType::Vp6);
        assert!(err.to_string().contains("Codec unsupported"));
        assert!(err.to_string().contains("VP6"));

        let err = Error::Media(MediaError::InvalidFlvTag);
        assert!(err.to_string().contains("FLV tag"));
    }

    #[test]
    fn test_io_reclassification() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::from(io_err).downstream();
        assert!(matches!(err, Error::DownstreamIo(_)));
        assert!(StdError::source(&err).is_some());

        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err = Error::from(io_err).upstream();
        assert!(matches!(err, Error::UpstreamIo(_)));

        // Non-I/O errors are left alone
        let err = Error::CodecSetMismatch.downstream();
        assert!(matches!(err, Error::CodecSetMismatch));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::Registry(RegistryError::NotFound("x".into())).is_not_found());
        assert!(!Error::Registry(RegistryError::AlreadyPublishing("x".into())).is_not_found());
    }
}
