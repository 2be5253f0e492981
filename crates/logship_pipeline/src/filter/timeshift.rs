//! Shifts record timestamps by a fixed offset.
//!
//! Useful when a source emits local-time timestamps that must be
//! normalized to UTC.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::FilterPlugin;
use chrono::Duration;
use logship_codec::LogRecord;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Options {
    #[serde(default)]
    offset_seconds: i64,
}

struct TimeshiftFilter {
    offset: Duration,
}

/// Builds a `timeshift` filter from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn FilterPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("timeshift filter: {err}")))?;
    Ok(Box::new(TimeshiftFilter {
        offset: Duration::seconds(options.offset_seconds),
    }))
}

impl FilterPlugin for TimeshiftFilter {
    fn process(&mut self, mut record: LogRecord) -> LogRecord {
        if !self.offset.is_zero() {
            record.timestamp += self.offset;
        }
        record
    }
}
