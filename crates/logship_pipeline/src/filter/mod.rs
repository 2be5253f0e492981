//! Built-in filter plugins.

pub mod annotate;
pub mod tags;
pub mod timeshift;
