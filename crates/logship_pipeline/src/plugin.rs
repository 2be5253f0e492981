//! Plugin contracts and the ingress seam between inputs and the queue.

use crate::error::PipelineResult;
use logship_codec::{encode, LogRecord};
use logship_queue::QueueHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Shutdown signal handed to long-running plugin tasks.
///
/// Flips to `true` exactly once; tasks finish their current unit of
/// work and exit.
pub type Shutdown = watch::Receiver<bool>;

/// An input stage: produces records and feeds them to an [`Ingress`].
///
/// `start` spawns the plugin's own task and returns its handle; the
/// task must exit promptly when the shutdown signal flips or when the
/// ingress reports the queue closed.
pub trait InputPlugin: Send {
    /// Starts producing records.
    fn start(&mut self, ingress: Ingress, shutdown: Shutdown) -> JoinHandle<()>;
}

/// A filter stage: a pure synchronous record transform.
pub trait FilterPlugin: Send {
    /// Transforms one record. No failure channel; a filter that cannot
    /// apply leaves the record unchanged.
    fn process(&mut self, record: LogRecord) -> LogRecord;
}

/// An output stage: delivers records to an external sink.
pub trait OutputPlugin: Send {
    /// Attempts delivery of one record.
    ///
    /// # Errors
    ///
    /// Any error means the record was not delivered; the egress loop
    /// retries the same record after a fixed backoff.
    fn process(&mut self, record: &LogRecord) -> PipelineResult<()>;

    /// Releases resources. Called once, after the egress loop stops.
    fn stop(&mut self) {}
}

/// Accepts records from input plugins into the pipeline's durable
/// queue.
///
/// Cloneable; every input of a pipeline shares the same queue. The
/// queue's bounded inbox is the backpressure seam: a slow disk
/// throttles all producers.
#[derive(Debug, Clone)]
pub struct Ingress {
    name: String,
    queue: QueueHandle,
}

impl Ingress {
    pub(crate) fn new(name: impl Into<String>, queue: QueueHandle) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    /// Durably accepts one record.
    ///
    /// A record that fails to encode is logged and dropped; that is
    /// local to the record and not an error for the producer.
    ///
    /// # Errors
    ///
    /// Queue errors (closed, out-of-bounds size, transient I/O)
    /// propagate so the producer can throttle or exit.
    pub async fn accept(&self, record: &LogRecord) -> PipelineResult<()> {
        let bytes = match encode(record) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(pipeline = %self.name, error = %err, "dropping unencodable record");
                return Ok(());
            }
        };
        self.queue.put(bytes).await?;
        Ok(())
    }
}
