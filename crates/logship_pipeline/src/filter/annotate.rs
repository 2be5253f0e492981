//! Sets an extra field to a templated value when it is absent.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::FilterPlugin;
use logship_codec::LogRecord;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Options {
    key: String,
    #[serde(default)]
    value: String,
}

struct AnnotateFilter {
    key: String,
    value: String,
}

/// Builds an `annotate` filter from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn FilterPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("annotate filter: {err}")))?;
    Ok(Box::new(AnnotateFilter {
        key: options.key,
        value: options.value,
    }))
}

impl FilterPlugin for AnnotateFilter {
    fn process(&mut self, mut record: LogRecord) -> LogRecord {
        if !record.extra.contains_key(&self.key) {
            let value = record.format(&self.value);
            record.set_extra(self.key.clone(), value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_codec::Value;

    fn build(key: &str, value: &str) -> Box<dyn FilterPlugin> {
        factory(&serde_json::json!({"key": key, "value": value})).unwrap()
    }

    #[test]
    fn sets_absent_field() {
        let mut filter = build("env", "prod");
        let record = filter.process(LogRecord::new("hello"));
        assert_eq!(record.extra.get("env"), Some(&Value::Text("prod".into())));
    }

    #[test]
    fn leaves_present_field_alone() {
        let mut filter = build("env", "prod");
        let mut record = LogRecord::new("hello");
        record.set_extra("env", "staging");
        let record = filter.process(record);
        assert_eq!(
            record.extra.get("env"),
            Some(&Value::Text("staging".into()))
        );
    }

    #[test]
    fn value_is_templated_against_the_record() {
        let mut filter = build("summary", "msg=${message}");
        let record = filter.process(LogRecord::new("boom"));
        assert_eq!(
            record.extra.get("summary"),
            Some(&Value::Text("msg=boom".into()))
        );
    }

    #[test]
    fn factory_requires_key() {
        assert!(factory(&serde_json::json!({"value": "x"})).is_err());
    }
}
