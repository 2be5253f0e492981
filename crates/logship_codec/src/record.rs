//! The log record flowing through the pipeline.

use crate::value::Value;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Millisecond-precision render of `@timestamp` fields.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Day-precision render of `@date` fields.
const DATE_FORMAT: &str = "%Y-%m-%d";

fn re_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\+([^}]+)\}").unwrap())
}

fn re_var() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([\w@]+)\}").unwrap())
}

/// A structured log record.
///
/// Created by an input stage, mutated by filter stages, consumed by an
/// output stage after successful delivery. Between stages it lives
/// encoded inside a durable queue, so every field must survive the
/// binary codec round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// When the record was produced, UTC.
    pub timestamp: DateTime<Utc>,
    /// The raw log line or message body (may be empty).
    pub message: String,
    /// Ordered tags, duplicate-free by value.
    pub tags: Vec<String>,
    /// Open-ended structured fields added by inputs and filters.
    pub extra: BTreeMap<String, Value>,
}

impl LogRecord {
    /// Creates a record with the current timestamp and the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            tags: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Adds one tag, applying template substitution first.
    ///
    /// A no-op when the substituted tag already exists in the list.
    pub fn add_tag(&mut self, tag: &str) {
        self.add_tags([tag]);
    }

    /// Adds tags, applying template substitution to each first.
    ///
    /// A tag is skipped when the substituted text already exists in the
    /// tag list, so repeated application is a no-op.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let formatted = self.format(tag.as_ref());
            if !self.tags.iter().any(|t| t == &formatted) {
                self.tags.push(formatted);
            }
        }
    }

    /// Sets an extra field, overwriting any previous value.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Looks up a field value.
    ///
    /// `@timestamp`, `@date` and `message` resolve from the fixed
    /// fields; anything else reads `extra`.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "@timestamp" | "@date" => Some(Value::Text(self.get_string(field))),
            "message" => Some(Value::Text(self.message.clone())),
            _ => self.extra.get(field).cloned(),
        }
    }

    /// Looks up a field and renders it as display text.
    ///
    /// Returns an empty string for absent fields.
    pub fn get_string(&self, field: &str) -> String {
        match field {
            "@timestamp" => self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            "@date" => self.timestamp.format(DATE_FORMAT).to_string(),
            "message" => self.message.clone(),
            _ => self
                .extra
                .get(field)
                .map(Value::display_string)
                .unwrap_or_default(),
        }
    }

    /// Expands a template against this record.
    ///
    /// Three substitution passes, in order:
    /// 1. `${+fmt}`: current time rendered with a chrono format string;
    /// 2. `${field}`: record fields via [`LogRecord::get_string`];
    /// 3. `${NAME}`: environment variables, for names no field matched.
    ///
    /// Tokens that resolve to an empty string are left in place.
    pub fn format(&self, template: &str) -> String {
        let mut out = format_with_time(template, Utc::now());

        let snapshot = out.clone();
        for caps in re_var().captures_iter(&snapshot) {
            let token = &caps[0];
            let value = self.get_string(&caps[1]);
            if !value.is_empty() {
                out = out.replace(token, &value);
            }
        }

        format_with_env(&out)
    }

    /// Renders the record as the JSON object outputs emit.
    ///
    /// `@timestamp` is always present; `message` and `tags` only when
    /// non-empty; extras are merged at the top level.
    pub fn to_json(&self) -> serde_json::Value {
        let mut event = serde_json::Map::new();
        event.insert(
            "@timestamp".to_string(),
            serde_json::Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        if !self.message.is_empty() {
            event.insert(
                "message".to_string(),
                serde_json::Value::String(self.message.clone()),
            );
        }
        if !self.tags.is_empty() {
            event.insert(
                "tags".to_string(),
                serde_json::Value::Array(
                    self.tags
                        .iter()
                        .map(|t| serde_json::Value::String(t.clone()))
                        .collect(),
                ),
            );
        }
        for (key, value) in &self.extra {
            event.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(event)
    }

    /// Serializes [`LogRecord::to_json`], optionally pretty-printed.
    pub fn to_json_string(&self, readable: bool) -> String {
        let json = self.to_json();
        if readable {
            serde_json::to_string_pretty(&json).unwrap_or_default()
        } else {
            json.to_string()
        }
    }
}

impl Default for LogRecord {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// Expands `${+fmt}` tokens against the given instant.
///
/// An invalid chrono format string leaves the token in place.
fn format_with_time(template: &str, now: DateTime<Utc>) -> String {
    let mut out = template.to_string();
    for caps in re_time().captures_iter(template) {
        let mut rendered = String::new();
        if write!(rendered, "{}", now.format(&caps[1])).is_ok() {
            out = out.replace(&caps[0], &rendered);
        }
    }
    out
}

/// Expands `${NAME}` tokens from the process environment.
///
/// Unset or empty variables leave the token in place.
pub fn format_with_env(template: &str) -> String {
    let mut out = template.to_string();
    for caps in re_var().captures_iter(template) {
        if let Ok(value) = std::env::var(&caps[1]) {
            if !value.is_empty() {
                out = out.replace(&caps[0], &value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_record() -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2021, 3, 5, 12, 30, 45).unwrap(),
            message: "hello world".to_string(),
            tags: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn get_string_fixed_fields() {
        let record = fixed_record();
        assert_eq!(record.get_string("@timestamp"), "2021-03-05T12:30:45.000");
        assert_eq!(record.get_string("@date"), "2021-03-05");
        assert_eq!(record.get_string("message"), "hello world");
        assert_eq!(record.get_string("missing"), "");
    }

    #[test]
    fn get_string_extra_fields() {
        let mut record = fixed_record();
        record.set_extra("host", "web-1");
        record.set_extra("pid", 421);
        assert_eq!(record.get_string("host"), "web-1");
        assert_eq!(record.get_string("pid"), "421");
    }

    #[test]
    fn add_tags_deduplicates_after_substitution() {
        let mut record = fixed_record();
        record.set_extra("env", "prod");
        record.add_tags(["${env}", "prod", "audit"]);
        assert_eq!(record.tags, vec!["prod", "audit"]);

        record.add_tags(["audit"]);
        assert_eq!(record.tags, vec!["prod", "audit"]);

        record.add_tag("ship");
        record.add_tag("ship");
        assert_eq!(record.tags, vec!["prod", "audit", "ship"]);
    }

    #[test]
    fn format_substitutes_fields() {
        let mut record = fixed_record();
        record.set_extra("host", "web-1");
        assert_eq!(
            record.format("logs-${host}-${@date}"),
            "logs-web-1-2021-03-05"
        );
    }

    #[test]
    fn format_leaves_unknown_tokens() {
        let record = fixed_record();
        assert_eq!(record.format("x-${nope}"), "x-${nope}");
    }

    #[test]
    fn format_env_fallback() {
        std::env::set_var("LOGSHIP_TEST_REGION", "eu-1");
        let record = fixed_record();
        assert_eq!(record.format("r=${LOGSHIP_TEST_REGION}"), "r=eu-1");
    }

    #[test]
    fn format_time_token() {
        let now = Utc.with_ymd_and_hms(2021, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(format_with_time("d-${+%Y.%m.%d}", now), "d-2021.03.05");
    }

    #[test]
    fn to_json_shape() {
        let mut record = fixed_record();
        record.add_tags(["t1"]);
        record.set_extra("host", "web-1");

        let json = record.to_json();
        assert_eq!(json["@timestamp"], "2021-03-05T12:30:45.000Z");
        assert_eq!(json["message"], "hello world");
        assert_eq!(json["tags"][0], "t1");
        assert_eq!(json["host"], "web-1");
    }

    #[test]
    fn to_json_omits_empty_message_and_tags() {
        let mut record = fixed_record();
        record.message.clear();
        let json = record.to_json();
        assert!(json.get("message").is_none());
        assert!(json.get("tags").is_none());
    }
}
