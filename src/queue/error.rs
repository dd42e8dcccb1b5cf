//! Queue error types

use thiserror::Error;

/// Error type for broadcast queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// `write_header` was called a second time
    #[error("Header already written")]
    HeaderAlreadyWritten,

    /// Packet written before the header
    #[error("Packet written before header")]
    InvalidState,

    /// Write after `close`
    #[error("Queue closed")]
    QueueClosed,

    /// Queue closed before a header was written
    #[error("End of stream before header")]
    EndOfStream,

    /// Packet refers to a stream the header does not declare
    #[error("Invalid stream index {index} (header has {streams} streams)")]
    InvalidStreamIndex { index: usize, streams: usize },
}
