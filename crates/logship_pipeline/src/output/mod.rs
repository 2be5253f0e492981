//! Built-in output plugins.

pub mod file;
pub mod stdout;
