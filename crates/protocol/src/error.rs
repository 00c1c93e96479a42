//! Codec error types

use thiserror::Error;

/// Errors produced while decoding device responses and notifications
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Response buffer shorter than the expected fixed width
    #[error("short response: needed {needed} bytes, got {got}")]
    ShortResponse { needed: usize, got: usize },

    /// Notification payload shorter than the fixed 8-byte layout
    #[error("short notification: needed {needed} bytes, got {got}")]
    ShortNotification { needed: usize, got: usize },
}

/// Type alias for codec results
pub type Result<T> = std::result::Result<T, CodecError>;
