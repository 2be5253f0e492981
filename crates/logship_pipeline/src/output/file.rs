//! Appends records as JSON lines to a templated file path.
//!
//! The `path` option is expanded per record, so `${+%Y-%m-%d}` style
//! tokens produce daily files. The most recent file handle is cached
//! and reopened only when the expanded path changes.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::OutputPlugin;
use logship_codec::LogRecord;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct Options {
    path: String,
}

struct FileOutput {
    path_template: String,
    current: Option<(PathBuf, File)>,
}

/// Builds a `file` output from its options block.
pub fn factory(options: &serde_json::Value) -> PipelineResult<Box<dyn OutputPlugin>> {
    let options: Options = serde_json::from_value(options.clone())
        .map_err(|err| PipelineError::config(format!("file output: {err}")))?;
    Ok(Box::new(FileOutput {
        path_template: options.path,
        current: None,
    }))
}

impl FileOutput {
    fn open(&mut self, path: PathBuf) -> PipelineResult<&mut File> {
        let reopen = match &self.current {
            Some((current, _)) => current != &path,
            None => true,
        };
        if reopen {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.current = Some((path, file));
        }
        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(PipelineError::delivery("file output lost its handle")),
        }
    }
}

impl OutputPlugin for FileOutput {
    fn process(&mut self, record: &LogRecord) -> PipelineResult<()> {
        let path = PathBuf::from(record.format(&self.path_template));
        let line = record.to_json_string(false);
        let file = self.open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((_, file)) = self.current.take() {
            let _ = file.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut output = factory(&serde_json::json!({
            "path": path.to_string_lossy(),
        }))
        .unwrap();

        let mut record = LogRecord::new("first");
        record.set_extra("n", 1);
        output.process(&record).unwrap();
        record.message = "second".to_string();
        output.process(&record).unwrap();
        output.stop();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"first\""));
        assert!(lines[1].contains("\"second\""));
    }

    #[test]
    fn templated_path_switches_files() {
        let dir = tempdir().unwrap();
        let template = format!("{}/${{host}}.log", dir.path().display());
        let mut output = factory(&serde_json::json!({"path": template})).unwrap();

        let mut record = LogRecord::new("a");
        record.set_extra("host", "web-1");
        output.process(&record).unwrap();
        record.set_extra("host", "web-2");
        output.process(&record).unwrap();
        output.stop();

        assert!(dir.path().join("web-1.log").exists());
        assert!(dir.path().join("web-2.log").exists());
    }

    #[test]
    fn factory_requires_path() {
        assert!(factory(&serde_json::json!({})).is_err());
    }
}
