//! # logship pipeline
//!
//! Pipeline assembly: pluggable inputs feed a durable queue, a filter
//! chain transforms records, and each output drains its own durable
//! queue. Stage boundaries are crash-safe; delivery is at-least-once
//! with peek-then-commit consumption and infinite fixed-backoff retry
//! on output failure.
//!
//! ## Usage
//!
//! ```no_run
//! use logship_pipeline::{Pipeline, PipelineConfig, Registry};
//! use logship_queue::QueueConfig;
//! use std::path::Path;
//!
//! # async fn example() -> logship_pipeline::PipelineResult<()> {
//! let registry = Registry::builtin();
//! let config = PipelineConfig::load_file(
//!     Path::new("/etc/logship/web.json"),
//!     Path::new("/var/lib/logship"),
//! )?;
//! let mut pipeline = Pipeline::build(&config, &registry, QueueConfig::default())?;
//! pipeline.start()?;
//! // ... until shutdown ...
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod plugin;
mod registry;

pub mod filter;
pub mod input;
pub mod output;

pub use config::{PipelineConfig, StageConfig};
pub use coordinator::Pipeline;
pub use error::{PipelineError, PipelineResult};
pub use plugin::{FilterPlugin, Ingress, InputPlugin, OutputPlugin, Shutdown};
pub use registry::Registry;
