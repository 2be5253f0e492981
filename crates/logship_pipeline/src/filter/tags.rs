//! Adds templated tags to every record.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::FilterPlugin;
use logship_codec::LogRecord;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Options {
    #[serde(default)]
    tags: Vec<String>,
}

struct TagsFilter {
    tags: Vec<String>,
}

/// Builds a `tags` filter from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn FilterPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("tags filter: {err}")))?;
    Ok(Box::new(TagsFilter { tags: options.tags }))
}

impl FilterPlugin for TagsFilter {
    fn process(&mut self, mut record: LogRecord) -> LogRecord {
        record.add_tags(&self.tags);
        record
    }
}
