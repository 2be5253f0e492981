//! File tailer.
//!
//! Polls a log file for appended lines; each complete line becomes one
//! record with `host`, `path` and `offset` extras. A file that shrinks
//! below the consumed offset or disappears is treated as rotated and
//! reopened from the start. With `follow` (the default) tailing begins
//! at the current end of file; `"follow": false` reads existing
//! content first.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{Ingress, InputPlugin, Shutdown};
use logship_codec::LogRecord;
use serde::Deserialize;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn default_follow() -> bool {
    true
}

fn default_poll_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
struct Options {
    path: String,
    #[serde(default = "default_follow")]
    follow: bool,
    #[serde(default = "default_poll_ms")]
    poll_interval_ms: u64,
}

struct FileInput {
    path: String,
    follow: bool,
    poll: Duration,
    hostname: String,
}

/// Builds a `file` input from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn InputPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("file input: {err}")))?;
    Ok(Box::new(FileInput {
        path: options.path,
        follow: options.follow,
        poll: Duration::from_millis(options.poll_interval_ms),
        hostname: super::machine_hostname(),
    }))
}

impl InputPlugin for FileInput {
    fn start(&mut self, ingress: Ingress, shutdown: Shutdown) -> JoinHandle<()> {
        let tailer = Tailer {
            path: self.path.clone(),
            start_at_end: self.follow,
            poll: self.poll,
            hostname: self.hostname.clone(),
        };
        tokio::spawn(tailer.run(ingress, shutdown))
    }
}

struct Tailer {
    path: String,
    start_at_end: bool,
    poll: Duration,
    hostname: String,
}

impl Tailer {
    async fn run(mut self, ingress: Ingress, mut shutdown: Shutdown) {
        let mut reader: Option<BufReader<File>> = None;
        let mut offset: u64 = 0;
        // Bytes of a line whose terminator has not arrived yet.
        let mut pending = String::new();
        let mut line = String::new();

        loop {
            let Some(current) = reader.as_mut() else {
                match self.open(&mut offset).await {
                    Some(file) => {
                        reader = Some(file);
                        pending.clear();
                    }
                    // Absent; poll until it shows up.
                    None => {
                        if pause(self.poll, &mut shutdown).await {
                            break;
                        }
                    }
                }
                continue;
            };

            line.clear();
            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = current.read_line(&mut line) => read,
            };

            match read {
                Ok(0) => {
                    if self.rotated(offset).await {
                        reader = None;
                        offset = 0;
                        continue;
                    }
                    if pause(self.poll, &mut shutdown).await {
                        break;
                    }
                }
                Ok(n) => {
                    offset += n as u64;
                    if !line.ends_with('\n') {
                        // Partial tail line; wait for the rest.
                        pending.push_str(&line);
                        continue;
                    }
                    let message = format!("{pending}{}", line.trim_end_matches(['\n', '\r']));
                    pending.clear();

                    let mut record = LogRecord::new(message);
                    record.set_extra("host", self.hostname.clone());
                    record.set_extra("path", self.path.clone());
                    record.set_extra("offset", offset as i64);
                    if ingress.accept(&record).await.is_err() {
                        break; // queue closed
                    }
                }
                Err(err) => {
                    warn!(path = %self.path, error = %err, "file input read failed");
                    reader = None;
                    offset = 0;
                    if pause(self.poll, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
    }

    /// Opens the tailed file at the tracked offset.
    ///
    /// The very first open of a followed file seeks to the end; every
    /// reopen afterwards starts from the rotation-reset offset.
    async fn open(&mut self, offset: &mut u64) -> Option<BufReader<File>> {
        let mut file = File::open(&self.path).await.ok()?;
        if self.start_at_end {
            *offset = file.metadata().await.map(|meta| meta.len()).unwrap_or(0);
        }
        self.start_at_end = false;
        if *offset > 0 && file.seek(SeekFrom::Start(*offset)).await.is_err() {
            *offset = 0;
        }
        debug!(path = %self.path, offset = *offset, "tailing file");
        Some(BufReader::new(file))
    }

    /// Whether the file was truncated or replaced beneath the cursor.
    async fn rotated(&self, offset: u64) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.len() < offset => {
                warn!(path = %self.path, "file truncated, reading from the start");
                true
            }
            Ok(_) => false,
            Err(_) => {
                debug!(path = %self.path, "file went away, waiting for it to return");
                true
            }
        }
    }
}

/// Sleeps one poll interval; returns `true` when shutdown fired.
async fn pause(poll: Duration, shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(poll) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_codec::{decode, Value};
    use logship_queue::{DurableQueue, QueueConfig, QueueHandle};
    use std::io::Write as _;
    use tempfile::tempdir;
    use tokio::sync::watch;

    fn start_tailer(
        log_path: &std::path::Path,
        queue: QueueHandle,
    ) -> (watch::Sender<bool>, JoinHandle<()>) {
        let ingress = Ingress::new("tail", queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut plugin = factory(&serde_json::json!({
            "path": log_path.to_string_lossy(),
            "follow": false,
            "poll_interval_ms": 20,
        }))
        .unwrap();
        let task = plugin.start(ingress, shutdown_rx);
        (shutdown_tx, task)
    }

    async fn next_message(queue: &QueueHandle) -> LogRecord {
        decode(&queue.read().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn reads_existing_lines_then_tails_appends() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("app.log");
        std::fs::write(&log_path, "first\nsecond\n").unwrap();

        let queue = DurableQueue::open("tail", dir.path(), QueueConfig::default()).unwrap();
        let (shutdown_tx, task) = start_tailer(&log_path, queue.clone());

        let record = next_message(&queue).await;
        assert_eq!(record.message, "first");
        assert_eq!(
            record.extra.get("path"),
            Some(&Value::Text(log_path.to_string_lossy().into_owned()))
        );
        assert_eq!(next_message(&queue).await.message, "second");

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        writeln!(file, "third").unwrap();
        drop(file);
        assert_eq!(next_message(&queue).await.message, "third");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        queue.close().await;
    }

    #[tokio::test]
    async fn reopens_from_start_after_truncation() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("rotating.log");
        std::fs::write(&log_path, "a rather long first line\n").unwrap();

        let queue = DurableQueue::open("rotate", dir.path(), QueueConfig::default()).unwrap();
        let (shutdown_tx, task) = start_tailer(&log_path, queue.clone());

        assert_eq!(next_message(&queue).await.message, "a rather long first line");

        // Replace with shorter content, as logrotate's truncation does.
        std::fs::write(&log_path, "new\n").unwrap();
        assert_eq!(next_message(&queue).await.message, "new");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        queue.close().await;
    }

    #[tokio::test]
    async fn waits_for_a_file_that_does_not_exist_yet() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("late.log");

        let queue = DurableQueue::open("late", dir.path(), QueueConfig::default()).unwrap();
        let (shutdown_tx, task) = start_tailer(&log_path, queue.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&log_path, "finally\n").unwrap();
        assert_eq!(next_message(&queue).await.message, "finally");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        queue.close().await;
    }

    #[test]
    fn factory_requires_path() {
        assert!(factory(&serde_json::json!({})).is_err());
    }
}
