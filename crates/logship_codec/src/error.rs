//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a record.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The payload does not start with the record magic.
    #[error("invalid record magic")]
    InvalidMagic,

    /// The payload declares a format version newer than this build understands.
    #[error("unsupported record version: {version}")]
    UnsupportedVersion {
        /// The version found in the payload.
        version: u16,
    },

    /// Unknown value tag encountered while decoding.
    #[error("unknown value tag: {tag:#04x}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
    },

    /// A declared length exceeds the decoder's sanity limits.
    #[error("declared length {len} exceeds limit {limit}")]
    LengthLimit {
        /// The declared length.
        len: u64,
        /// The enforced limit.
        limit: u64,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The timestamp field is out of the representable range.
    #[error("timestamp out of range: {seconds}s {nanos}ns")]
    TimestampOutOfRange {
        /// Seconds since the Unix epoch.
        seconds: i64,
        /// Subsecond nanoseconds.
        nanos: u32,
    },

    /// Trailing bytes remained after a complete record was decoded.
    #[error("trailing bytes after record: {remaining}")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        remaining: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }
}
