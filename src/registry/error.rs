//! Registry error types
//!
//! Error types for channel registry operations.

use thiserror::Error;

/// Error type for registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live publisher under this name
    #[error("Channel not found: {0}")]
    NotFound(String),

    /// Another publisher already owns this name
    #[error("Channel already has a publisher: {0}")]
    AlreadyPublishing(String),
}
