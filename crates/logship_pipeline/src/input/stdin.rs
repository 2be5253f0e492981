//! Standard-input line reader.
//!
//! Every line becomes one record with the machine hostname in the
//! `host` extra. An optional `prefix` option is prepended to each
//! message.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{Ingress, InputPlugin, Shutdown};
use logship_codec::LogRecord;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct Options {
    #[serde(default)]
    prefix: String,
}

struct StdinInput {
    prefix: String,
    hostname: String,
}

/// Builds a `stdin` input from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn InputPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("stdin input: {err}")))?;
    Ok(Box::new(StdinInput {
        prefix: options.prefix,
        hostname: super::machine_hostname(),
    }))
}

impl InputPlugin for StdinInput {
    fn start(&mut self, ingress: Ingress, mut shutdown: Shutdown) -> JoinHandle<()> {
        let prefix = self.prefix.clone();
        let hostname = self.hostname.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    line = lines.next_line() => {
                        let line = match line {
                            Ok(Some(line)) => line,
                            Ok(None) => break, // EOF
                            Err(err) => {
                                warn!(error = %err, "stdin read failed");
                                break;
                            }
                        };
                        let message = if prefix.is_empty() {
                            line
                        } else {
                            format!("{prefix}{line}")
                        };
                        let mut record = LogRecord::new(message);
                        record.set_extra("host", hostname.clone());
                        if ingress.accept(&record).await.is_err() {
                            break; // queue closed
                        }
                    }
                }
            }
        })
    }
}
