//! Built-in input plugins.

pub mod file;
pub mod stdin;
pub mod tcp;

/// Hostname stamped into the `host` extra of produced records.
pub(crate) fn machine_hostname() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "localhost".to_string())
}
