//! Pipeline configuration files.
//!
//! A pipeline is described by a JSON document with three stage lists:
//!
//! ```json
//! {
//!     "name": "web-logs",
//!     "input":  [{"type": "stdin"}],
//!     "filter": [{"type": "annotate", "key": "env", "value": "prod"}],
//!     "output": [{"type": "stdout"}]
//! }
//! ```
//!
//! Lines starting with `#` or `//` are comments. Every string field
//! supports `${VAR}` environment substitution.

use crate::error::{PipelineError, PipelineResult};
use logship_codec::format_with_env;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One stage entry: a plugin type plus its free-form options.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Registered plugin type name.
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Plugin-specific options, passed to the factory untouched.
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl StageConfig {
    /// The options block as a JSON value for factory deserialization.
    pub fn options_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.options.clone())
    }
}

/// A full pipeline description.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name; also the prefix of its queue files.
    #[serde(default)]
    pub name: String,

    /// Directory holding the pipeline's durable queues.
    #[serde(default)]
    pub data_path: PathBuf,

    /// Input stages.
    #[serde(default)]
    pub input: Vec<StageConfig>,

    /// Filter stages, applied in listed order.
    #[serde(default)]
    pub filter: Vec<StageConfig>,

    /// Output stages.
    #[serde(default)]
    pub output: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Parses a configuration from JSON text.
    ///
    /// `fallback_name` and `fallback_data_path` fill in fields the
    /// document leaves empty.
    ///
    /// # Errors
    ///
    /// `Config` when the document is not valid JSON or does not match
    /// the expected shape.
    pub fn from_str(
        text: &str,
        fallback_name: &str,
        fallback_data_path: &Path,
    ) -> PipelineResult<Self> {
        let cleaned = strip_comments(text);
        let mut json: serde_json::Value = serde_json::from_str(&cleaned)
            .map_err(|err| PipelineError::config(format!("invalid JSON: {err}")))?;
        substitute_env(&mut json);

        let mut config: Self = serde_json::from_value(json)
            .map_err(|err| PipelineError::config(format!("invalid pipeline config: {err}")))?;
        if config.name.is_empty() {
            config.name = fallback_name.to_string();
        }
        if config.data_path.as_os_str().is_empty() {
            config.data_path = fallback_data_path.to_path_buf();
        }
        Ok(config)
    }

    /// Loads one configuration file; the file stem is the fallback
    /// pipeline name.
    pub fn load_file(path: &Path, fallback_data_path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_str(&text, &name, fallback_data_path)
    }

    /// Loads every `*.json` file in a directory.
    ///
    /// Unreadable or invalid files are logged and skipped so one bad
    /// file does not take down the others.
    pub fn load_dir(dir: &Path, fallback_data_path: &Path) -> PipelineResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(PipelineError::config(format!(
                "config path {} is not a directory",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut configs = Vec::new();
        for path in paths {
            match Self::load_file(&path, fallback_data_path) {
                Ok(config) => configs.push(config),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping bad config file");
                }
            }
        }
        Ok(configs)
    }
}

/// Removes full-line `#` and `//` comments and carriage returns.
fn strip_comments(text: &str) -> String {
    text.replace('\r', "")
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.starts_with('#') && !trimmed.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies `${VAR}` environment substitution to every string in the
/// document, keys excluded.
fn substitute_env(json: &mut serde_json::Value) {
    match json {
        serde_json::Value::String(s) => *s = format_with_env(s),
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_env(item);
            }
        }
        serde_json::Value::Object(map) => {
            for value in map.values_mut() {
                substitute_env(value);
            }
        }
        _ => {}
    }
}
