//! Plugin graph: typed connectors, the plugin contract, the registry and
//! the graph itself.

pub mod connector;
pub mod graph;
pub mod plugin;
pub mod registry;

pub use connector::{queued, Direction, PayloadTap, PortSpec, QueuedReceiver, QueuedSender};
pub use graph::{parse_endpoint, ConnectionSpec, CycleStats, Graph, GraphSpec, PluginSpec};
pub use plugin::{Plugin, PortIo};
pub use registry::{PluginFactory, PluginRegistry};
