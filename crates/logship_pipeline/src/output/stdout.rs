//! Writes records to standard output as readable JSON.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::OutputPlugin;
use logship_codec::LogRecord;
use serde::Deserialize;
use std::io::Write;

#[derive(Debug, Default, Deserialize)]
struct Options {}

struct StdoutOutput;

/// Builds a `stdout` output from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn OutputPlugin>> {
    let _: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("stdout output: {err}")))?;
    Ok(Box::new(StdoutOutput))
}

impl OutputPlugin for StdoutOutput {
    fn process(&mut self, record: &LogRecord) -> PipelineResult<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", record.to_json_string(true))?;
        Ok(())
    }
}
