//! Built-in plugins and their registry entries.

pub mod amp_spectrum;
pub mod channel_source;
pub mod event_builder;
pub mod extract_signal;
pub mod raw_write;

pub use amp_spectrum::{AmpSpectrumPlugin, SPECTRUM_BINS};
pub use channel_source::{bind_module_sources, ChannelSourcePlugin};
pub use event_builder::{ByteCounters, EventBuilderPlugin, DEFAULT_EVENT_PORT};
pub use extract_signal::ExtractSignalPlugin;
pub use raw_write::RawWritePlugin;

use crate::graph::PluginRegistry;

/// Register every built-in plugin type.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register("eventbuilder", EventBuilderPlugin::factory);
    registry.register("ampspectrum", AmpSpectrumPlugin::factory);
    registry.register("extractsignal", ExtractSignalPlugin::factory);
    registry.register("rawwrite", RawWritePlugin::factory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry);
        assert_eq!(
            registry.type_names(),
            vec!["ampspectrum", "eventbuilder", "extractsignal", "rawwrite"]
        );
    }
}
