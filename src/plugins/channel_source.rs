//! Channel sources: the seam between hardware modules and the graph.
//!
//! Modules fill their channel buffers during `acquire`; a channel source
//! is a zero-input plugin bound to one such buffer that publishes its
//! contents at the start of each cycle. Downstream plugins then see
//! hardware data through ordinary connectors, and a channel that produced
//! nothing simply publishes nothing.

use crate::data::Payload;
use crate::error::AppResult;
use crate::graph::{Graph, Plugin, PortIo, PortSpec};
use crate::hardware::{ChannelBuffer, DaqModule};

/// Publishes one hardware channel's buffer into the graph.
pub struct ChannelSourcePlugin {
    outputs: Vec<PortSpec>,
    buffer: ChannelBuffer,
}

impl ChannelSourcePlugin {
    pub fn new(buffer: ChannelBuffer) -> Self {
        Self {
            outputs: vec![PortSpec::u32("out")],
            buffer,
        }
    }
}

impl Plugin for ChannelSourcePlugin {
    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn mandatory_inputs(&self) -> usize {
        0
    }

    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        if let Some(samples) = self.buffer.take() {
            io.publish(0, Payload::from_u32(samples));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Add a channel source named `<module>/<channel>` for every enabled
/// non-trigger channel of `module`. Returns the node names added.
pub fn bind_module_sources(graph: &mut Graph, module: &dyn DaqModule) -> AppResult<Vec<String>> {
    let mut names = Vec::new();
    for channel in module.channels() {
        if !channel.enabled() || channel.kind().is_trigger() {
            continue;
        }
        let name = format!("{}/{}", module.name(), channel.name());
        graph.add_plugin(name.clone(), Box::new(ChannelSourcePlugin::new(channel.buffer())))?;
        names.push(name);
    }
    Ok(names)
}
