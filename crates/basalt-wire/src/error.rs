//! Error types for the wire layer.

use thiserror::Error;

/// Errors raised while reading or writing the binary wire format.
///
/// A decode error is fatal to the message being read, never to the
/// connection it arrived on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid array length: {0}")]
    InvalidArrayLength(i32),

    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(u16),

    #[error("Unknown wire version ordinal: {0}")]
    UnknownVersion(u16),

    #[error("Invalid UTF-8 string: {0}")]
    Utf8(String),
}

impl From<std::string::FromUtf8Error> for WireError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        WireError::Utf8(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
