//! # logship queue
//!
//! A durable, crash-safe on-disk FIFO queue.
//!
//! Records are appended to length-prefixed segment files that rotate
//! at a configurable size cap; a small metadata file persists the
//! read/write cursors and pending-record count across restarts. A
//! dedicated actor task owns all file I/O; callers interact through a
//! cloneable async [`QueueHandle`].
//!
//! Durability model: consuming a record is a two-step protocol. A read
//! fetches the record and *tentatively* moves the cursor; only the
//! commit makes it durable. A record handed out just before a crash is
//! delivered again on restart (at-least-once). Corrupted segments are
//! set aside with a `.bad` suffix and skipped, never crashing the
//! queue.
//!
//! ## Usage
//!
//! ```no_run
//! use logship_queue::{DurableQueue, QueueConfig};
//!
//! # async fn example() -> logship_queue::QueueResult<()> {
//! let queue = DurableQueue::open("events", "/var/lib/logship", QueueConfig::default())?;
//! queue.put(b"hello".to_vec()).await?;
//! let record = queue.read().await?;
//! assert_eq!(record, b"hello");
//! queue.close().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actor;
mod config;
mod error;
mod segment;

pub use actor::{DurableQueue, QueueHandle};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
