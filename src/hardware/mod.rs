//! Hardware module abstraction.
//!
//! The acquisition core never talks to registers. It consumes modules
//! through [`DaqModule`]: reset and configure at run start, `acquire`
//! when a trigger fires, `data_ready` when polling. A module that fails
//! to acquire simply leaves its channel buffers empty for that cycle.

pub mod channel;
pub mod sim;

pub use channel::{Channel, ChannelBuffer, ChannelKind, TriggerMode};

use crate::error::AppResult;
use crate::run::TriggerSender;
use crate::settings::{SettingsGroup, SettingsGroupMut};

/// A hardware-facing data source with one or more channels.
pub trait DaqModule: Send {
    /// Stable module name, used for settings groups and diagnostics.
    fn name(&self) -> &str;

    /// Ordered channel list.
    fn channels(&self) -> &[Channel];

    /// Mutable channel access, for enable toggles.
    fn channels_mut(&mut self) -> &mut [Channel];

    /// Put the hardware into a known state.
    fn reset(&mut self) -> AppResult<()>;

    /// Program the hardware according to the current configuration.
    fn configure(&mut self) -> AppResult<()>;

    /// Read out one cycle of data into the enabled channels' buffers.
    fn acquire(&mut self) -> AppResult<()>;

    /// Whether the module has data waiting to be acquired.
    fn data_ready(&self) -> bool;

    /// Hand the module a sender for interrupt trigger signals. Modules
    /// without interrupt triggers ignore this.
    fn set_trigger_sink(&mut self, sink: TriggerSender) {
        let _ = sink;
    }

    /// Load configuration from the module's settings group.
    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        let _ = group;
    }

    /// Store configuration into the module's settings group.
    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        let _ = group;
    }
}
