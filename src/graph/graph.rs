//! The plugin graph: nodes, typed edges and per-cycle evaluation.
//!
//! Plugins are added under unique names and wired by connecting an output
//! port to an input port. All wiring is validated eagerly: payload kinds
//! must match, an input accepts exactly one upstream link, and an edge
//! that would close a cycle is refused. A graph that builds successfully
//! therefore cannot fail structurally at run time.
//!
//! Evaluation walks the nodes in dependency order once per acquisition
//! cycle. A node runs only when at least its mandatory number of inputs
//! carry data published in the same cycle; everything else is skipped
//! silently, which is how missing hardware data propagates through the
//! graph as absence rather than as an error.

use crate::data::Payload;
use crate::error::{AppResult, GraphError};
use crate::graph::connector::{queued, OutputSlot, PayloadTap, PayloadTapSender};
use crate::graph::plugin::{Plugin, PortIo};
use crate::graph::registry::PluginRegistry;
use crate::run::RunInfo;
use crate::settings::{SettingsGroup, SettingsStore};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// One endpoint of an edge, resolved to a port index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    plugin: String,
    port: usize,
}

struct Edge {
    from: Endpoint,
    to: Endpoint,
}

struct Tap {
    from: Endpoint,
    sender: PayloadTapSender,
}

struct Node {
    name: String,
    plugin: Box<dyn Plugin>,
    outputs: Vec<OutputSlot>,
}

/// Counts of what happened during one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Plugins that ran to completion.
    pub ran: usize,
    /// Plugins skipped for lack of mandatory inputs.
    pub skipped: usize,
    /// Plugins that returned an error (their outputs were discarded).
    pub failed: usize,
}

/// Directed acyclic graph of processing plugins.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    taps: Vec<Tap>,
    order: Vec<usize>,
    cycle: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plugins in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The number of completed evaluation cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Plugin names in insertion order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Plugin names in the current evaluation order.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.nodes[i].name.as_str())
            .collect()
    }

    pub fn plugin(&self, name: &str) -> Option<&dyn Plugin> {
        self.index.get(name).map(|&i| self.nodes[i].plugin.as_ref())
    }

    pub fn plugin_mut(&mut self, name: &str) -> Option<&mut (dyn Plugin + 'static)> {
        let idx = *self.index.get(name)?;
        Some(self.nodes[idx].plugin.as_mut())
    }

    /// Add a plugin under a unique name.
    pub fn add_plugin(&mut self, name: impl Into<String>, plugin: Box<dyn Plugin>) -> AppResult<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateName(name).into());
        }
        let outputs = (0..plugin.output_ports().len())
            .map(|_| OutputSlot::default())
            .collect();
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(Node {
            name,
            plugin,
            outputs,
        });
        self.recompute_order();
        Ok(())
    }

    /// Remove a plugin, detaching every edge and tap that touches it.
    pub fn remove_plugin(&mut self, name: &str) -> AppResult<()> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownPlugin(name.to_string()))?;
        self.edges
            .retain(|e| e.from.plugin != name && e.to.plugin != name);
        self.taps.retain(|t| t.from.plugin != name);
        self.nodes.remove(idx);
        self.index.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            self.index.insert(node.name.clone(), i);
        }
        self.recompute_order();
        Ok(())
    }

    fn node_idx(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownPlugin(name.to_string()))
    }

    fn resolve_output(&self, plugin: &str, port: &str) -> Result<Endpoint, GraphError> {
        let idx = self.node_idx(plugin)?;
        let pos = self.nodes[idx]
            .plugin
            .output_ports()
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| GraphError::UnknownPort {
                plugin: plugin.to_string(),
                direction: "output",
                port: port.to_string(),
            })?;
        Ok(Endpoint {
            plugin: plugin.to_string(),
            port: pos,
        })
    }

    fn resolve_input(&self, plugin: &str, port: &str) -> Result<Endpoint, GraphError> {
        let idx = self.node_idx(plugin)?;
        let pos = self.nodes[idx]
            .plugin
            .input_ports()
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| GraphError::UnknownPort {
                plugin: plugin.to_string(),
                direction: "input",
                port: port.to_string(),
            })?;
        Ok(Endpoint {
            plugin: plugin.to_string(),
            port: pos,
        })
    }

    /// True if `to` is reachable from `from` along existing edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            for edge in &self.edges {
                if edge.from.plugin == current && !seen.contains(&edge.to.plugin.as_str()) {
                    seen.push(&edge.to.plugin);
                    stack.push(&edge.to.plugin);
                }
            }
        }
        false
    }

    /// Link an output port to an input port.
    ///
    /// Fails with [`GraphError::TypeMismatch`] when the declared payload
    /// kinds differ, [`GraphError::AlreadyConnected`] when the input
    /// already has an upstream link, and [`GraphError::WouldCycle`] when
    /// the edge would close a cycle. No edge is recorded on failure.
    pub fn connect(
        &mut self,
        from_plugin: &str,
        from_port: &str,
        to_plugin: &str,
        to_port: &str,
    ) -> AppResult<()> {
        let from = self.resolve_output(from_plugin, from_port)?;
        let to = self.resolve_input(to_plugin, to_port)?;

        let from_kind = self.nodes[self.node_idx(from_plugin)?]
            .plugin
            .output_ports()[from.port]
            .kind;
        let to_kind = self.nodes[self.node_idx(to_plugin)?].plugin.input_ports()[to.port].kind;
        if from_kind != to_kind {
            return Err(GraphError::TypeMismatch {
                output: format!("{from_plugin}.{from_port}"),
                input: format!("{to_plugin}.{to_port}"),
                output_kind: from_kind,
                input_kind: to_kind,
            }
            .into());
        }

        if self.edges.iter().any(|e| e.to == to) {
            return Err(GraphError::AlreadyConnected(format!("{to_plugin}.{to_port}")).into());
        }

        // Adding from -> to closes a cycle iff `from` is reachable from `to`.
        if from_plugin == to_plugin || self.reaches(to_plugin, from_plugin) {
            return Err(GraphError::WouldCycle {
                output: format!("{from_plugin}.{from_port}"),
                input: format!("{to_plugin}.{to_port}"),
            }
            .into());
        }

        self.edges.push(Edge { from, to });
        self.recompute_order();
        Ok(())
    }

    /// Remove the upstream link of an input port. Succeeds silently when
    /// the input is not connected.
    pub fn disconnect(&mut self, to_plugin: &str, to_port: &str) -> AppResult<()> {
        let to = self.resolve_input(to_plugin, to_port)?;
        self.edges.retain(|e| e.to != to);
        self.recompute_order();
        Ok(())
    }

    /// Attach a queued connector to an output port for consumption from
    /// another scheduling context. Every fresh value published on the
    /// port is forwarded; a slow consumer loses old values, never new
    /// ones.
    pub fn tap(&mut self, plugin: &str, port: &str) -> AppResult<PayloadTap> {
        let from = self.resolve_output(plugin, port)?;
        let (sender, receiver) = queued(format!("{plugin}.{port}"));
        self.taps.push(Tap { from, sender });
        Ok(receiver)
    }

    /// The value published on an output port during the current cycle.
    pub fn output_value(&self, plugin: &str, port: &str) -> AppResult<Option<Payload>> {
        let endpoint = self.resolve_output(plugin, port)?;
        let idx = self.node_idx(plugin)?;
        Ok(self.nodes[idx].outputs[endpoint.port]
            .read(self.cycle)
            .cloned())
    }

    /// Kahn's algorithm over plugin-level edges. Ties resolve in
    /// insertion order, so evaluation is deterministic.
    fn recompute_order(&mut self) {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        for edge in &self.edges {
            if let Some(&to) = self.index.get(&edge.to.plugin) {
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for edge in &self.edges {
                if edge.from.plugin == self.nodes[idx].name {
                    if let Some(&to) = self.index.get(&edge.to.plugin) {
                        in_degree[to] -= 1;
                        if in_degree[to] == 0 {
                            queue.push_back(to);
                        }
                    }
                }
            }
        }

        // connect() refuses cycles, so this cannot trigger; if it ever
        // does, evaluate the remaining nodes in insertion order.
        if order.len() != n {
            warn!("plugin graph contains a cycle, falling back to insertion order");
            for i in 0..n {
                if !order.contains(&i) {
                    order.push(i);
                }
            }
        }
        self.order = order;
    }

    /// Evaluate one acquisition cycle.
    ///
    /// Nodes run in dependency order; an output is always published
    /// before any plugin reading it runs. A failing plugin has its
    /// outputs discarded and does not stop the cycle.
    pub fn run_cycle(&mut self) -> CycleStats {
        self.cycle += 1;
        let cycle = self.cycle;
        let mut stats = CycleStats::default();

        for pos in 0..self.order.len() {
            let node_idx = self.order[pos];

            let n_inputs = self.nodes[node_idx].plugin.input_ports().len();
            let mut inputs: Vec<Option<Payload>> = vec![None; n_inputs];
            for edge in &self.edges {
                if edge.to.plugin != self.nodes[node_idx].name {
                    continue;
                }
                if let Some(&src) = self.index.get(&edge.from.plugin) {
                    if let Some(value) = self.nodes[src].outputs[edge.from.port].read(cycle) {
                        inputs[edge.to.port] = Some(value.clone());
                    }
                }
            }

            let fresh = inputs.iter().filter(|v| v.is_some()).count();
            let mandatory = self.nodes[node_idx].plugin.mandatory_inputs().min(n_inputs);
            if fresh < mandatory {
                stats.skipped += 1;
                continue;
            }

            let n_outputs = self.nodes[node_idx].plugin.output_ports().len();
            let mut outputs: Vec<Option<Payload>> = vec![None; n_outputs];
            let node = &mut self.nodes[node_idx];
            let mut io = PortIo::new(&inputs, &mut outputs);
            match node.plugin.run_cycle(&mut io) {
                Ok(()) => stats.ran += 1,
                Err(e) => {
                    warn!(plugin = %node.name, error = %e, "plugin failed, outputs discarded");
                    stats.failed += 1;
                    continue;
                }
            }

            for (port, value) in outputs.into_iter().enumerate() {
                if let Some(value) = value {
                    for tap in &self.taps {
                        if tap.from.plugin == node.name && tap.from.port == port {
                            tap.sender.send(value.clone());
                        }
                    }
                    node.outputs[port].publish(cycle, value);
                }
            }
        }

        debug!(cycle, ran = stats.ran, skipped = stats.skipped, "graph cycle complete");
        stats
    }

    /// Notify every plugin that a run is starting.
    pub fn run_started(&mut self, info: &RunInfo) {
        for node in &mut self.nodes {
            node.plugin.run_started(info);
        }
    }

    /// Notify every plugin that the run has stopped.
    pub fn run_stopped(&mut self) {
        for node in &mut self.nodes {
            node.plugin.run_stopped();
        }
    }

    /// Clear accumulated state in every plugin.
    pub fn reset_all(&mut self) {
        for node in &mut self.nodes {
            node.plugin.reset();
        }
    }

    /// Apply each plugin's settings group from the store.
    pub fn apply_settings(&mut self, store: &SettingsStore) {
        for node in &mut self.nodes {
            node.plugin.apply_settings(&store.group(&node.name));
        }
    }

    /// Save each plugin's settings group into the store.
    pub fn save_settings(&self, store: &mut SettingsStore) {
        for node in &self.nodes {
            node.plugin.save_settings(&mut store.group_mut(&node.name));
        }
    }

    /// Instantiate plugins and edges from a declarative description.
    pub fn apply_spec(&mut self, spec: &GraphSpec, registry: &PluginRegistry) -> AppResult<()> {
        for plugin in &spec.plugins {
            let attrs = SettingsGroup::from_table(&plugin.attrs);
            let instance = registry.create(&plugin.type_name, &plugin.name, &attrs)?;
            self.add_plugin(plugin.name.clone(), instance)?;
        }
        for connection in &spec.connections {
            let (from_plugin, from_port) = parse_endpoint(&connection.from)?;
            let (to_plugin, to_port) = parse_endpoint(&connection.to)?;
            self.connect(from_plugin, from_port, to_plugin, to_port)?;
        }
        Ok(())
    }
}

/// Declarative graph description, read from the `[graph]` settings group.
#[derive(Debug, Default, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

/// One plugin instance in a graph description.
#[derive(Debug, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub attrs: toml::Table,
}

/// One edge in a graph description, endpoints written as `plugin.port`.
#[derive(Debug, Deserialize)]
pub struct ConnectionSpec {
    pub from: String,
    pub to: String,
}

impl GraphSpec {
    /// Read the `[graph]` section of a settings store, empty if absent.
    pub fn from_settings(store: &SettingsStore) -> AppResult<Self> {
        match store.root().get("graph") {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| crate::error::DaqError::Settings(e.to_string())),
            None => Ok(Self::default()),
        }
    }
}

/// Split an endpoint string into plugin and port names. The port is
/// everything after the last dot, so plugin names may contain slashes
/// and ports may contain spaces.
pub fn parse_endpoint(spec: &str) -> Result<(&str, &str), GraphError> {
    match spec.rsplit_once('.') {
        Some((plugin, port)) if !plugin.is_empty() && !port.is_empty() => Ok((plugin, port)),
        _ => Err(GraphError::BadEndpoint(spec.to_string())),
    }
}
