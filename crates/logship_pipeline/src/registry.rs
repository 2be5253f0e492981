//! Plugin type registry.
//!
//! A plain table mapping type names to typed constructor functions.
//! It is populated once, before any pipeline is constructed, and read
//! only thereafter; there is no runtime registration from plugins
//! themselves.

use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{FilterPlugin, InputPlugin, OutputPlugin};
use crate::{filter, input, output};
use std::collections::HashMap;

/// Constructor for an input plugin from its options block.
pub type InputFactory = fn(&serde_json::Value) -> PipelineResult<Box<dyn InputPlugin>>;
/// Constructor for a filter plugin from its options block.
pub type FilterFactory = fn(&serde_json::Value) -> PipelineResult<Box<dyn FilterPlugin>>;
/// Constructor for an output plugin from its options block.
pub type OutputFactory = fn(&serde_json::Value) -> PipelineResult<Box<dyn OutputPlugin>>;

/// Write-once table of plugin factories.
#[derive(Default)]
pub struct Registry {
    inputs: HashMap<String, InputFactory>,
    filters: HashMap<String, FilterFactory>,
    outputs: HashMap<String, OutputFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in plugin registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_input("stdin", input::stdin::factory);
        registry.register_input("file", input::file::factory);
        registry.register_input("tcp", input::tcp::factory);
        registry.register_filter("annotate", filter::annotate::factory);
        registry.register_filter("timeshift", filter::timeshift::factory);
        registry.register_filter("tags", filter::tags::factory);
        registry.register_output("stdout", output::stdout::factory);
        registry.register_output("file", output::file::factory);
        registry
    }

    /// Registers an input plugin type.
    pub fn register_input(&mut self, name: impl Into<String>, factory: InputFactory) {
        self.inputs.insert(name.into(), factory);
    }

    /// Registers a filter plugin type.
    pub fn register_filter(&mut self, name: impl Into<String>, factory: FilterFactory) {
        self.filters.insert(name.into(), factory);
    }

    /// Registers an output plugin type.
    pub fn register_output(&mut self, name: impl Into<String>, factory: OutputFactory) {
        self.outputs.insert(name.into(), factory);
    }

    /// Constructs an input plugin.
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` when the type name is not registered.
    pub fn build_input(
        &self,
        name: &str,
        options: &serde_json::Value,
    ) -> PipelineResult<Box<dyn InputPlugin>> {
        let factory = self
            .inputs
            .get(name)
            .ok_or_else(|| PipelineError::unknown_plugin("input", name))?;
        factory(options)
    }

    /// Constructs a filter plugin.
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` when the type name is not registered.
    pub fn build_filter(
        &self,
        name: &str,
        options: &serde_json::Value,
    ) -> PipelineResult<Box<dyn FilterPlugin>> {
        let factory = self
            .filters
            .get(name)
            .ok_or_else(|| PipelineError::unknown_plugin("filter", name))?;
        factory(options)
    }

    /// Constructs an output plugin.
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` when the type name is not registered.
    pub fn build_output(
        &self,
        name: &str,
        options: &serde_json::Value,
    ) -> PipelineResult<Box<dyn OutputPlugin>> {
        let factory = self
            .outputs
            .get(name)
            .ok_or_else(|| PipelineError::unknown_plugin("output", name))?;
        factory(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_knows_all_shipped_plugins() {
        let registry = Registry::builtin();
        let empty = serde_json::json!({});
        assert!(registry.build_input("stdin", &empty).is_ok());
        assert!(registry
            .build_input("file", &serde_json::json!({ "path": "/var/log/app.log" }))
            .is_ok());
        assert!(registry.build_filter("tags", &empty).is_ok());
        assert!(registry.build_output("stdout", &empty).is_ok());
    }

    #[test]
    fn unknown_type_is_fatal() {
        let registry = Registry::builtin();
        let empty = serde_json::json!({});
        let Err(err) = registry.build_output("kafka", &empty) else {
            panic!("expected unknown output type to be rejected");
        };
        assert!(matches!(
            err,
            PipelineError::UnknownPlugin { kind: "output", .. }
        ));
    }
}
