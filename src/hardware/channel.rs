//! Channels: the per-signal endpoints a hardware module exposes.
//!
//! A channel is either a trigger (it decides when a cycle happens) or a
//! data channel (it carries samples read out during `acquire`). Data
//! channels own a single-slot sample buffer; the owning module fills it
//! during acquisition and a channel-source plugin drains it into the
//! graph. The slot is written and read within the scheduler context, the
//! mutex only guards against observers peeking from other threads.

use std::sync::{Arc, Mutex};

/// How a trigger channel announces readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// The module raises a signal; the scheduler blocks until it arrives.
    Interrupt,
    /// The scheduler repeatedly asks the module whether data is ready.
    Poll,
}

/// The role of a channel within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Drives the acquisition cycle.
    Trigger(TriggerMode),
    /// Raw waveform samples.
    Trace,
    /// Digital level samples.
    Logic,
    /// Pre-assembled event words from module firmware.
    EventBuffer,
}

impl ChannelKind {
    pub fn is_trigger(&self) -> bool {
        matches!(self, ChannelKind::Trigger(_))
    }
}

/// Single-slot sample buffer shared between a module and its
/// channel-source plugin.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffer {
    slot: Arc<Mutex<Option<Vec<u32>>>>,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store this cycle's samples, replacing anything pending.
    pub fn put(&self, samples: Vec<u32>) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = Some(samples),
            Err(poisoned) => *poisoned.into_inner() = Some(samples),
        }
    }

    /// Take the pending samples, leaving the slot empty.
    pub fn take(&self) -> Option<Vec<u32>> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn clear(&self) {
        let _ = self.take();
    }
}

/// A named, typed signal endpoint on a hardware module.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
    enabled: bool,
    buffer: ChannelBuffer,
}

impl Channel {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            buffer: ChannelBuffer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The trigger mode, for trigger channels.
    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        match self.kind {
            ChannelKind::Trigger(mode) => Some(mode),
            _ => None,
        }
    }

    /// A handle on this channel's sample buffer.
    pub fn buffer(&self) -> ChannelBuffer {
        self.buffer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_put_take() {
        let buffer = ChannelBuffer::new();
        assert_eq!(buffer.take(), None);
        buffer.put(vec![1, 2, 3]);
        assert_eq!(buffer.take(), Some(vec![1, 2, 3]));
        assert_eq!(buffer.take(), None);
    }

    #[test]
    fn buffer_put_replaces_pending() {
        let buffer = ChannelBuffer::new();
        buffer.put(vec![1]);
        buffer.put(vec![2]);
        assert_eq!(buffer.take(), Some(vec![2]));
    }

    #[test]
    fn handles_share_the_slot() {
        let buffer = ChannelBuffer::new();
        let other = buffer.clone();
        buffer.put(vec![9]);
        assert_eq!(other.take(), Some(vec![9]));
    }

    #[test]
    fn trigger_mode_only_on_triggers() {
        let trigger = Channel::new("trg", ChannelKind::Trigger(TriggerMode::Poll));
        let trace = Channel::new("trace0", ChannelKind::Trace);
        assert_eq!(trigger.trigger_mode(), Some(TriggerMode::Poll));
        assert_eq!(trace.trigger_mode(), None);
        assert!(trigger.kind().is_trigger());
        assert!(!trace.kind().is_trigger());
    }
}
