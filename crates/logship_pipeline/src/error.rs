//! Error types for pipeline construction and operation.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage names a plugin type nobody registered.
    ///
    /// Fatal at construction time; the pipeline does not start and no
    /// queue is created.
    #[error("unknown {kind} plugin type {name:?}")]
    UnknownPlugin {
        /// Plugin kind: `input`, `filter` or `output`.
        kind: &'static str,
        /// The unresolved type name from the configuration.
        name: String,
    },

    /// A configuration file or stage options block is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// An I/O error outside the queue (config loading, plugin I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] logship_queue::QueueError),

    /// A record failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] logship_codec::CodecError),

    /// An output plugin failed to deliver a record.
    ///
    /// Recovered by the egress loop with fixed-backoff retry; never
    /// discards the record.
    #[error("delivery failed: {message}")]
    Delivery {
        /// Description of the delivery failure.
        message: String,
    },
}

impl PipelineError {
    /// Creates an unknown-plugin error.
    pub fn unknown_plugin(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownPlugin {
            kind,
            name: name.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a delivery error.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }
}
