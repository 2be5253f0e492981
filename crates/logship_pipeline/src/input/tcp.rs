//! TCP line listener.
//!
//! Accepts plain-text connections and turns every received line into
//! one record, stamped with the machine hostname and the peer address.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{Ingress, InputPlugin, Shutdown};
use logship_codec::LogRecord;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn default_bind() -> String {
    "127.0.0.1:5140".to_string()
}

#[derive(Debug, Deserialize)]
struct Options {
    #[serde(default = "default_bind")]
    bind: String,
}

struct TcpInput {
    bind: String,
    hostname: String,
}

/// Builds a `tcp` input from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn InputPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("tcp input: {err}")))?;
    Ok(Box::new(TcpInput {
        bind: options.bind,
        hostname: super::machine_hostname(),
    }))
}

impl InputPlugin for TcpInput {
    fn start(&mut self, ingress: Ingress, mut shutdown: Shutdown) -> JoinHandle<()> {
        let bind = self.bind.clone();
        let hostname = self.hostname.clone();

        tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(bind = %bind, error = %err, "tcp input failed to bind");
                    return;
                }
            };
            info!(bind = %bind, "tcp input listening");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(peer = %peer, "tcp input connection");
                                tokio::spawn(read_connection(
                                    stream,
                                    peer.to_string(),
                                    hostname.clone(),
                                    ingress.clone(),
                                    shutdown.clone(),
                                ));
                            }
                            Err(err) => warn!(error = %err, "tcp accept failed"),
                        }
                    }
                }
            }
        })
    }
}

async fn read_connection(
    stream: TcpStream,
    peer: String,
    hostname: String,
    ingress: Ingress,
    mut shutdown: Shutdown,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "tcp connection read failed");
                        break;
                    }
                };
                let mut record = LogRecord::new(line);
                record.set_extra("host", hostname.clone());
                record.set_extra("peer", peer.clone());
                if ingress.accept(&record).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_defaults_bind_address() {
        assert!(factory(&serde_json::json!({})).is_ok());
        assert!(factory(&serde_json::json!({"bind": "0.0.0.0:9000"})).is_ok());
    }
}
