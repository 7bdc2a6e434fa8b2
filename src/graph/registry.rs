//! Plugin type registry.
//!
//! Maps plugin type identifiers to constructor functions. The registry is
//! an explicitly owned object: the caller creates it, registers types and
//! passes it to the graph loader. Nothing here is global or lazily
//! initialized.

use crate::error::{AppResult, GraphError};
use crate::graph::plugin::Plugin;
use crate::settings::SettingsGroup;
use std::collections::HashMap;

/// Constructor for one plugin type. Receives the instance name and the
/// instance's attribute table from the graph description.
pub type PluginFactory = fn(&str, &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>>;

/// Name-to-constructor table for plugin instantiation.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin type. Re-registering a name replaces the old
    /// constructor.
    pub fn register(&mut self, type_name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    /// Instantiate a plugin of the given type.
    pub fn create(
        &self,
        type_name: &str,
        instance_name: &str,
        attrs: &SettingsGroup<'_>,
    ) -> AppResult<Box<dyn Plugin>> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        factory(instance_name, attrs)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted for stable listings.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Payload;
    use crate::error::DaqError;
    use crate::graph::connector::PortSpec;
    use crate::graph::plugin::PortIo;

    struct NullPlugin {
        outputs: Vec<PortSpec>,
    }

    impl Plugin for NullPlugin {
        fn input_ports(&self) -> &[PortSpec] {
            &[]
        }
        fn output_ports(&self) -> &[PortSpec] {
            &self.outputs
        }
        fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
            io.publish(0, Payload::from_u32(vec![]));
            Ok(())
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn make_null(_name: &str, _attrs: &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>> {
        Ok(Box::new(NullPlugin {
            outputs: vec![PortSpec::u32("out")],
        }))
    }

    #[test]
    fn create_known_type() {
        let mut registry = PluginRegistry::new();
        registry.register("null", make_null);

        let attrs = toml::Table::new();
        let plugin = registry
            .create("null", "n0", &SettingsGroup::from_table(&attrs))
            .unwrap();
        assert_eq!(plugin.output_ports().len(), 1);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = PluginRegistry::new();
        let attrs = toml::Table::new();
        let err = registry
            .create("missing", "m0", &SettingsGroup::from_table(&attrs))
            .unwrap_err();
        assert!(matches!(
            err,
            DaqError::Graph(GraphError::UnknownType(name)) if name == "missing"
        ));
    }

    #[test]
    fn type_names_are_sorted() {
        let mut registry = PluginRegistry::new();
        registry.register("zeta", make_null);
        registry.register("alpha", make_null);
        assert_eq!(registry.type_names(), vec!["alpha", "zeta"]);
    }
}
