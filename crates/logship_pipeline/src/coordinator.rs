//! Pipeline assembly and stage coordination.
//!
//! A pipeline is two queue-backed stage boundaries:
//!
//! ```text
//! inputs -> encode -> ingress queue -> filters -> output queues -> outputs
//! ```
//!
//! Every boundary is one durable queue with a single egress consumer.
//! Consumption is peek-then-commit: a record is only committed-read
//! after downstream delivery succeeded, so a crash mid-delivery
//! redelivers instead of losing it.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{FilterPlugin, Ingress, InputPlugin, OutputPlugin, Shutdown};
use crate::registry::Registry;
use logship_codec::{decode, encode, LogRecord};
use logship_queue::{DurableQueue, QueueConfig, QueueError, QueueHandle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fixed backoff between delivery retries of the same record.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Poll interval while waiting for the ingress queue to drain.
const DRAIN_POLL: Duration = Duration::from_millis(50);
/// Upper bound on waiting for the ingress queue to drain on stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully constructed pipeline, ready to start.
pub struct Pipeline {
    name: String,
    data_path: PathBuf,
    queue_config: QueueConfig,
    inputs: Vec<Box<dyn InputPlugin>>,
    filters: Option<Vec<Box<dyn FilterPlugin>>>,
    outputs: Option<Vec<(String, Box<dyn OutputPlugin>)>>,
    running: Option<Running>,
}

struct Running {
    ingress_queue: QueueHandle,
    output_queues: Vec<QueueHandle>,
    input_shutdown: watch::Sender<bool>,
    output_shutdown: watch::Sender<bool>,
    input_tasks: Vec<JoinHandle<()>>,
    filter_task: JoinHandle<()>,
    output_tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Builds a pipeline from its configuration.
    ///
    /// Every plugin is constructed here, before any queue exists, so a
    /// bad configuration fails fast without touching the data
    /// directory.
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` for unregistered type names; `Config` for
    /// invalid options blocks.
    pub fn build(
        config: &PipelineConfig,
        registry: &Registry,
        queue_config: QueueConfig,
    ) -> PipelineResult<Self> {
        let mut inputs = Vec::with_capacity(config.input.len());
        for stage in &config.input {
            inputs.push(registry.build_input(&stage.plugin_type, &stage.options_value())?);
        }

        let mut filters = Vec::with_capacity(config.filter.len());
        for stage in &config.filter {
            filters.push(registry.build_filter(&stage.plugin_type, &stage.options_value())?);
        }

        let mut outputs = Vec::with_capacity(config.output.len());
        for (index, stage) in config.output.iter().enumerate() {
            let plugin = registry.build_output(&stage.plugin_type, &stage.options_value())?;
            // The queue name must be unique per output; index-suffix
            // repeated types so their segment files never collide.
            let repeated = config.output[..index]
                .iter()
                .any(|prior| prior.plugin_type == stage.plugin_type);
            let suffix = if repeated {
                format!("{}{}", stage.plugin_type, index)
            } else {
                stage.plugin_type.clone()
            };
            outputs.push((suffix, plugin));
        }

        Ok(Self::from_parts(
            &config.name,
            config.data_path.clone(),
            queue_config,
            inputs,
            filters,
            outputs,
        ))
    }

    /// Assembles a pipeline from already constructed plugins.
    pub fn from_parts(
        name: &str,
        data_path: PathBuf,
        queue_config: QueueConfig,
        inputs: Vec<Box<dyn InputPlugin>>,
        filters: Vec<Box<dyn FilterPlugin>>,
        outputs: Vec<(String, Box<dyn OutputPlugin>)>,
    ) -> Self {
        Self {
            name: name.to_string(),
            data_path,
            queue_config,
            inputs,
            filters: Some(filters),
            outputs: Some(outputs),
            running: None,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens the queues and starts every stage task.
    ///
    /// # Errors
    ///
    /// Queue open failures; calling `start` twice is a `Config` error.
    pub fn start(&mut self) -> PipelineResult<()> {
        let (filters, outputs) = match (self.filters.take(), self.outputs.take()) {
            (Some(filters), Some(outputs)) => (filters, outputs),
            _ => return Err(PipelineError::config("pipeline already started")),
        };

        let ingress_queue =
            DurableQueue::open(&self.name, &self.data_path, self.queue_config.clone())?;
        let (input_shutdown, input_signal) = watch::channel(false);
        let (output_shutdown, output_signal) = watch::channel(false);

        let mut output_queues = Vec::with_capacity(outputs.len());
        let mut output_tasks = Vec::with_capacity(outputs.len());
        for (suffix, plugin) in outputs {
            let queue_name = format!("{}_{suffix}", self.name);
            let queue =
                DurableQueue::open(&queue_name, &self.data_path, self.queue_config.clone())?;
            output_queues.push(queue.clone());

            let egress = Egress {
                pipeline: self.name.clone(),
                stage: queue_name,
                queue,
                filters: Vec::new(),
                sink: Sink::Output { plugin },
                backoff: RETRY_BACKOFF,
                shutdown: output_signal.clone(),
            };
            output_tasks.push(tokio::spawn(egress.run()));
        }

        let filter_egress = Egress {
            pipeline: self.name.clone(),
            stage: self.name.clone(),
            queue: ingress_queue.clone(),
            filters,
            sink: Sink::Queues(output_queues.clone()),
            backoff: RETRY_BACKOFF,
            shutdown: output_signal,
        };
        let filter_task = tokio::spawn(filter_egress.run());

        let ingress = Ingress::new(&self.name, ingress_queue.clone());
        let input_tasks = self
            .inputs
            .iter_mut()
            .map(|plugin| plugin.start(ingress.clone(), input_signal.clone()))
            .collect();

        info!(pipeline = %self.name, "pipeline started");
        self.running = Some(Running {
            ingress_queue,
            output_queues,
            input_shutdown,
            output_shutdown,
            input_tasks,
            filter_task,
            output_tasks,
        });
        Ok(())
    }

    /// Gracefully stops the pipeline.
    ///
    /// Inputs stop first; the ingress queue is drained into the output
    /// queues (bounded wait); then the egress loops stop and every
    /// queue closes with a final sync. Undelivered records stay in the
    /// output queues for the next run.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.input_shutdown.send(true);
        for task in running.input_tasks {
            let _ = task.await;
        }

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            match running.ingress_queue.depth().await {
                Ok(0) | Err(_) => break,
                Ok(depth) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!(
                            pipeline = %self.name,
                            depth,
                            "stopping with undrained ingress records, they persist for the next run"
                        );
                        break;
                    }
                    tokio::time::sleep(DRAIN_POLL).await;
                }
            }
        }

        running.ingress_queue.close().await;
        let _ = running.filter_task.await;

        let _ = running.output_shutdown.send(true);
        for task in running.output_tasks {
            let _ = task.await;
        }
        for queue in running.output_queues {
            queue.close().await;
        }

        info!(pipeline = %self.name, "pipeline stopped");
    }
}

/// Delivery target of an egress loop.
pub(crate) enum Sink {
    /// Fan-out into the durable queue in front of each output.
    Queues(Vec<QueueHandle>),
    /// Final delivery through an output plugin.
    Output {
        /// The plugin; owned by the egress task for its lifetime.
        plugin: Box<dyn OutputPlugin>,
    },
}

impl Sink {
    async fn deliver(&mut self, record: &LogRecord) -> PipelineResult<()> {
        match self {
            Self::Queues(queues) => {
                let bytes = match encode(record) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        // Unencodable records cannot succeed on retry.
                        warn!(error = %err, "dropping unencodable record at fan-out");
                        return Ok(());
                    }
                };
                for queue in queues.iter() {
                    match queue.put(bytes.clone()).await {
                        Ok(()) => {}
                        Err(err @ QueueError::InvalidSize { .. }) => {
                            warn!(error = %err, "dropping oversized record at fan-out");
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(())
            }
            Self::Output { plugin } => plugin.process(record),
        }
    }

    fn stop(&mut self) {
        if let Self::Output { plugin } = self {
            plugin.stop();
        }
    }
}

/// One stage-boundary consumer loop.
pub(crate) struct Egress {
    pub(crate) pipeline: String,
    pub(crate) stage: String,
    pub(crate) queue: QueueHandle,
    pub(crate) filters: Vec<Box<dyn FilterPlugin>>,
    pub(crate) sink: Sink,
    pub(crate) backoff: Duration,
    pub(crate) shutdown: Shutdown,
}

impl Egress {
    /// Peek-then-commit consumer loop.
    ///
    /// Runs until the queue closes or the shutdown signal flips. A
    /// record is committed only after delivery succeeds; a delivery
    /// failure sleeps the fixed backoff and retries the same record
    /// indefinitely.
    pub(crate) async fn run(mut self) {
        loop {
            let raw = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = self.queue.peek() => match result {
                    Ok(raw) => raw,
                    Err(_) => break, // queue closed
                },
            };

            let record = match decode(&raw) {
                Ok(record) => record,
                Err(err) => {
                    // Poison record: discard with a trace, by policy.
                    warn!(
                        pipeline = %self.pipeline,
                        stage = %self.stage,
                        error = %err,
                        "discarding undecodable record"
                    );
                    if self.queue.read().await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let mut record = record;
            for filter in &mut self.filters {
                record = filter.process(record);
            }

            match self.sink.deliver(&record).await {
                Ok(()) => {
                    if self.queue.read().await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        pipeline = %self.pipeline,
                        stage = %self.stage,
                        error = %err,
                        "delivery failed, retrying after backoff"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
        self.sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::InputPlugin;
    use logship_codec::Value;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    /// Test input: forwards records pushed through a channel.
    struct ChannelInput {
        rx: Option<mpsc::Receiver<LogRecord>>,
    }

    impl InputPlugin for ChannelInput {
        fn start(&mut self, ingress: Ingress, mut shutdown: Shutdown) -> JoinHandle<()> {
            let mut rx = self.rx.take().expect("started twice");
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        record = rx.recv() => match record {
                            Some(record) => {
                                if ingress.accept(&record).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            })
        }
    }

    /// Test output: collects delivered messages, optionally failing
    /// the first `fail_first` attempts.
    struct CollectorOutput {
        delivered: Arc<Mutex<Vec<String>>>,
        attempts: Arc<Mutex<u32>>,
        fail_first: u32,
        stopped: Arc<Mutex<bool>>,
    }

    impl CollectorOutput {
        fn new(
            delivered: Arc<Mutex<Vec<String>>>,
            attempts: Arc<Mutex<u32>>,
            fail_first: u32,
            stopped: Arc<Mutex<bool>>,
        ) -> Box<dyn OutputPlugin> {
            Box::new(Self {
                delivered,
                attempts,
                fail_first,
                stopped,
            })
        }
    }

    impl OutputPlugin for CollectorOutput {
        fn process(&mut self, record: &LogRecord) -> PipelineResult<()> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts <= self.fail_first {
                return Err(PipelineError::delivery("collector not ready"));
            }
            self.delivered.lock().unwrap().push(record.message.clone());
            Ok(())
        }

        fn stop(&mut self) {
            *self.stopped.lock().unwrap() = true;
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn records_flow_input_to_output() {
        let dir = tempdir().unwrap();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0));
        let stopped = Arc::new(Mutex::new(false));
        let (tx, rx) = mpsc::channel(8);

        let mut filters = Vec::new();
        filters.push(crate::filter::tags::factory(&serde_json::json!({"tags": ["shipped"]})).unwrap());

        let mut pipeline = Pipeline::from_parts(
            "flow",
            dir.path().to_path_buf(),
            QueueConfig::default(),
            vec![Box::new(ChannelInput { rx: Some(rx) })],
            filters,
            vec![(
                "collector".to_string(),
                CollectorOutput::new(delivered.clone(), attempts.clone(), 0, stopped.clone()),
            )],
        );
        pipeline.start().unwrap();

        tx.send(LogRecord::new("one")).await.unwrap();
        tx.send(LogRecord::new("two")).await.unwrap();

        let seen = delivered.clone();
        wait_for(move || seen.lock().unwrap().len() == 2).await;
        assert_eq!(*delivered.lock().unwrap(), vec!["one", "two"]);

        pipeline.stop().await;
        assert!(*stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn delivery_failure_retries_same_record() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open("retry", dir.path(), QueueConfig::default()).unwrap();
        queue.put(encode(&LogRecord::new("stubborn")).unwrap()).await.unwrap();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0));
        let stopped = Arc::new(Mutex::new(false));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let egress = Egress {
            pipeline: "retry".to_string(),
            stage: "retry".to_string(),
            queue: queue.clone(),
            filters: Vec::new(),
            sink: Sink::Output {
                plugin: CollectorOutput::new(
                    delivered.clone(),
                    attempts.clone(),
                    2,
                    stopped.clone(),
                ),
            },
            backoff: Duration::from_millis(10),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(egress.run());

        let seen = delivered.clone();
        wait_for(move || seen.lock().unwrap().len() == 1).await;
        assert_eq!(*delivered.lock().unwrap(), vec!["stubborn"]);
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(queue.depth().await.unwrap(), 0);

        queue.close().await;
        let _ = task.await;
        assert!(*stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn poison_record_is_discarded_not_retried() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open("poison", dir.path(), QueueConfig::default()).unwrap();
        queue.put(b"definitely not a record".to_vec()).await.unwrap();
        queue.put(encode(&LogRecord::new("good")).unwrap()).await.unwrap();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0));
        let stopped = Arc::new(Mutex::new(false));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let egress = Egress {
            pipeline: "poison".to_string(),
            stage: "poison".to_string(),
            queue: queue.clone(),
            filters: Vec::new(),
            sink: Sink::Output {
                plugin: CollectorOutput::new(
                    delivered.clone(),
                    attempts.clone(),
                    0,
                    stopped.clone(),
                ),
            },
            backoff: Duration::from_millis(10),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(egress.run());

        let seen = delivered.clone();
        wait_for(move || seen.lock().unwrap().len() == 1).await;
        // The poison record was consumed without a delivery attempt.
        assert_eq!(*delivered.lock().unwrap(), vec!["good"]);
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);

        queue.close().await;
        let _ = task.await;
    }

    #[tokio::test]
    async fn filters_apply_in_configured_order() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open("ordered", dir.path(), QueueConfig::default()).unwrap();
        queue.put(encode(&LogRecord::new("hi")).unwrap()).await.unwrap();

        // First annotate sets `stage`; second sees it already present.
        let filters = vec![
            crate::filter::annotate::factory(
                &serde_json::json!({"key": "stage", "value": "first"}),
            )
            .unwrap(),
            crate::filter::annotate::factory(
                &serde_json::json!({"key": "stage", "value": "second"}),
            )
            .unwrap(),
        ];

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let extras = Arc::new(Mutex::new(Vec::new()));

        struct ExtraCollector {
            delivered: Arc<Mutex<Vec<String>>>,
            extras: Arc<Mutex<Vec<Option<Value>>>>,
        }
        impl OutputPlugin for ExtraCollector {
            fn process(&mut self, record: &LogRecord) -> PipelineResult<()> {
                self.delivered.lock().unwrap().push(record.message.clone());
                self.extras
                    .lock()
                    .unwrap()
                    .push(record.extra.get("stage").cloned());
                Ok(())
            }
        }

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let egress = Egress {
            pipeline: "ordered".to_string(),
            stage: "ordered".to_string(),
            queue: queue.clone(),
            filters,
            sink: Sink::Output {
                plugin: Box::new(ExtraCollector {
                    delivered: delivered.clone(),
                    extras: extras.clone(),
                }),
            },
            backoff: Duration::from_millis(10),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(egress.run());

        let seen = delivered.clone();
        wait_for(move || seen.lock().unwrap().len() == 1).await;
        assert_eq!(
            extras.lock().unwrap()[0],
            Some(Value::Text("first".into()))
        );

        queue.close().await;
        let _ = task.await;
    }

    #[tokio::test]
    async fn undelivered_records_survive_stop() {
        let dir = tempdir().unwrap();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0));
        let stopped = Arc::new(Mutex::new(false));
        let (tx, rx) = mpsc::channel(8);

        let mut pipeline = Pipeline::from_parts(
            "persist",
            dir.path().to_path_buf(),
            QueueConfig::default(),
            vec![Box::new(ChannelInput { rx: Some(rx) })],
            Vec::new(),
            vec![(
                "collector".to_string(),
                // Never succeeds while running.
                CollectorOutput::new(delivered.clone(), attempts.clone(), u32::MAX, stopped.clone()),
            )],
        );
        pipeline.start().unwrap();

        tx.send(LogRecord::new("held")).await.unwrap();
        let tried = attempts.clone();
        wait_for(move || *tried.lock().unwrap() >= 1).await;
        pipeline.stop().await;
        assert!(delivered.lock().unwrap().is_empty());

        // The record is still pending in the output queue on reopen.
        let queue =
            DurableQueue::open("persist_collector", dir.path(), QueueConfig::default()).unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);
        let record = decode(&queue.peek().await.unwrap()).unwrap();
        assert_eq!(record.message, "held");
        queue.close().await;
    }

    #[test]
    fn build_fails_on_unknown_plugin_before_any_queue() {
        let dir = tempdir().unwrap();
        let config = crate::config::PipelineConfig::from_str(
            r#"{"name": "bad", "output": [{"type": "nonexistent"}]}"#,
            "bad",
            dir.path(),
        )
        .unwrap();

        let result = Pipeline::build(&config, &Registry::builtin(), QueueConfig::default());
        let Err(err) = result else {
            panic!("expected unknown plugin type to fail the build");
        };
        assert!(matches!(err, PipelineError::UnknownPlugin { .. }));
        // No queue files were created.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
