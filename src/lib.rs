//! `scope_daq`
//!
//! A modular data acquisition front end. Hardware-reading modules and
//! data-transforming plugins are wired into a directed processing graph;
//! a dedicated scheduler thread drives the graph once per ready trigger
//! and terminal plugins persist and stream the resulting events.
//!
//! ## Architecture
//!
//! - **Modules** ([`hardware::DaqModule`]) face the hardware: `reset`,
//!   `configure`, `acquire`, `data_ready`. Their channels fill sample
//!   buffers that enter the graph through channel-source plugins.
//! - **The graph** ([`graph::Graph`]) connects typed plugin ports.
//!   Wiring is validated at build time (payload kinds, single upstream
//!   per input, acyclicity) and evaluated in dependency order.
//! - **The scheduler** ([`run::spawn`]) owns modules and graph for the
//!   duration of a run, detecting triggers by polling or by blocking on
//!   interrupt signals, one acquisition cycle per trigger.
//! - **The event builder** ([`plugins::EventBuilderPlugin`]) serializes
//!   each cycle's channel buffers into a length-prefixed binary record
//!   ([`event::EventRecord`]), written to rotating files and mirrored
//!   over a loopback datagram socket.
//!
//! ## Key Types
//!
//! - [`data::Payload`]: reference-counted sample sequence between ports
//! - [`graph::Plugin`]: the per-cycle transform contract
//! - [`run::RunHandle`]: control surface of an active run
//! - [`event::EventRecord`]: the wire/file event format
//! - [`settings::SettingsStore`]: per-component scalar configuration

pub mod data;
pub mod error;
pub mod event;
pub mod graph;
pub mod hardware;
pub mod net;
pub mod plugins;
pub mod run;
pub mod settings;

pub use data::{Payload, PayloadKind};
pub use error::{AppResult, CodecError, DaqError, GraphError};
pub use event::EventRecord;
pub use graph::{Graph, Plugin, PluginRegistry, PortIo};
pub use run::{RunHandle, RunInfo, RunOptions, RunStatus};
pub use settings::SettingsStore;
