//! Errors raised while framing DAP messages.

use std::io;

/// Failure to encode or decode a single frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header block is not valid UTF-8.
    #[error("invalid UTF-8 in frame header")]
    InvalidUtf8,

    #[error("malformed Content-Length value {0:?}")]
    MalformedContentLength(String),

    #[error("frame header has no Content-Length")]
    MissingContentLength,

    /// The frame announces a body larger than the codec accepts.
    #[error("message size {size} exceeds maximum allowed {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("decoding message body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("encoding message body: {0}")]
    Encode(#[source] serde_json::Error),
}
