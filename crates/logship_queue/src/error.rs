//! Error types for queue operations.

use std::io;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// An I/O error occurred.
    ///
    /// Transient conditions (disk full, permissions) surface here; the
    /// queue keeps running and retries subsequent operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload size is outside the configured bounds.
    #[error("invalid message size {len}: allowed range [{min}, {max}]")]
    InvalidSize {
        /// The offending payload length.
        len: u64,
        /// Minimum allowed payload length.
        min: u64,
        /// Maximum allowed payload length.
        max: u64,
    },

    /// A segment is corrupted at the read position.
    ///
    /// Recovered internally by abandoning the segment; never surfaced
    /// to a waiting consumer.
    #[error("segment {segment} corrupt at offset {offset}: {message}")]
    Corrupt {
        /// Segment sequence number.
        segment: u64,
        /// Byte offset of the failed read.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The current read segment is exhausted.
    ///
    /// Expected when the reader reaches the end of a rotated segment;
    /// the read cursor has already rolled to the next segment.
    #[error("end of segment")]
    EndOfSegment,

    /// The metadata file exists but cannot be parsed.
    #[error("metadata unreadable: {message}")]
    Metadata {
        /// Description of the parse failure.
        message: String,
    },

    /// The queue has been closed.
    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    /// Creates a corruption error for the given read position.
    pub fn corrupt(segment: u64, offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            segment,
            offset,
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }
}
