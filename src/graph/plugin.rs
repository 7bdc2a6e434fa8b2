//! The plugin contract.
//!
//! A plugin is a named node in the processing graph. It declares typed
//! input and output ports, and the graph calls [`Plugin::run_cycle`] once
//! per acquisition cycle when enough of its inputs carry fresh data. All
//! port access goes through [`PortIo`], which the graph populates before
//! the call and drains afterwards, so a plugin never touches another
//! plugin's state.

use crate::data::Payload;
use crate::error::AppResult;
use crate::graph::connector::PortSpec;
use crate::run::RunInfo;
use crate::settings::{SettingsGroup, SettingsGroupMut};

/// Per-cycle port access handed to [`Plugin::run_cycle`].
///
/// Inputs are resolved by the graph: `input(i)` holds the value the
/// upstream output published this cycle, or `None` if the input is
/// unconnected or its producer skipped the cycle. Values published via
/// `publish` become visible to downstream plugins in the same cycle.
pub struct PortIo<'a> {
    inputs: &'a [Option<Payload>],
    outputs: &'a mut [Option<Payload>],
}

impl<'a> PortIo<'a> {
    pub fn new(inputs: &'a [Option<Payload>], outputs: &'a mut [Option<Payload>]) -> Self {
        Self { inputs, outputs }
    }

    /// The fresh value on input `index`, if any.
    pub fn input(&self, index: usize) -> Option<&Payload> {
        self.inputs.get(index).and_then(|v| v.as_ref())
    }

    /// Number of inputs carrying fresh data this cycle.
    pub fn fresh_inputs(&self) -> usize {
        self.inputs.iter().filter(|v| v.is_some()).count()
    }

    /// Publish `value` on output `index`, replacing anything published
    /// earlier in the same cycle.
    pub fn publish(&mut self, index: usize, value: Payload) {
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = Some(value);
        }
    }
}

/// A processing node: one transform per acquisition cycle.
///
/// Implementations are single-threaded; the graph owns the plugin and
/// only ever calls it from the scheduler context.
pub trait Plugin: Send {
    /// Ordered input port declarations.
    fn input_ports(&self) -> &[PortSpec];

    /// Ordered output port declarations.
    fn output_ports(&self) -> &[PortSpec];

    /// Minimum number of inputs that must carry fresh data before the
    /// plugin runs in a cycle. Defaults to all declared inputs.
    fn mandatory_inputs(&self) -> usize {
        self.input_ports().len()
    }

    /// Perform this cycle's transform.
    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()>;

    /// Clear accumulated state (histograms, counters) without touching
    /// configuration.
    fn reset(&mut self) {}

    /// Called once when a run starts, before the first cycle.
    fn run_started(&mut self, info: &RunInfo) {
        let _ = info;
    }

    /// Called once when a run stops, after the last cycle.
    fn run_stopped(&mut self) {}

    /// Load configuration from the plugin's settings group.
    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        let _ = group;
    }

    /// Store configuration into the plugin's settings group.
    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        let _ = group;
    }

    /// Downcast support for callers that need the concrete type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
