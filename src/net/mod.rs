//! Network services outside the event data path.

pub mod control;

pub use control::{ControlService, RunCommand, DEFAULT_CONTROL_PORT};
