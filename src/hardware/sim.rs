//! Simulated digitizer for bench-less operation and tests.
//!
//! Produces pulse-shaped traces on top of a noisy baseline. Readiness is
//! clocked off the poll rate: every `ready_interval`-th call to
//! `data_ready` reports true, so poll throughput stays high while event
//! rate stays reasonable.

use crate::error::AppResult;
use crate::hardware::channel::{Channel, ChannelKind, TriggerMode};
use crate::hardware::DaqModule;
use crate::run::{TriggerSender, TriggerSignal};
use crate::settings::{SettingsGroup, SettingsGroupMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Shape of the simulated traces.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of trace channels.
    pub trace_channels: usize,
    /// Samples per trace.
    pub trace_len: usize,
    /// Flat baseline level in ADC counts.
    pub baseline: u32,
    /// Peak height above baseline.
    pub pulse_height: u32,
    /// Uniform noise amplitude around the baseline.
    pub noise: u32,
    /// Report data ready every Nth `data_ready` query.
    pub ready_interval: u32,
    /// How the trigger channel announces readiness.
    pub trigger_mode: TriggerMode,
    /// Seed for the trace generator.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            trace_channels: 2,
            trace_len: 256,
            baseline: 200,
            pulse_height: 1200,
            noise: 4,
            ready_interval: 1024,
            trigger_mode: TriggerMode::Poll,
            seed: 0x5EED,
        }
    }
}

/// A software stand-in for a waveform digitizer.
pub struct SimDigitizer {
    name: String,
    config: SimConfig,
    channels: Vec<Channel>,
    rng: StdRng,
    ready_clock: AtomicU32,
    trigger_sink: Option<TriggerSender>,
}

impl SimDigitizer {
    pub fn new(name: impl Into<String>, config: SimConfig) -> Self {
        let mut channels = vec![Channel::new(
            "trigger",
            ChannelKind::Trigger(config.trigger_mode),
        )];
        for i in 0..config.trace_channels {
            channels.push(Channel::new(format!("trace{i}"), ChannelKind::Trace));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            name: name.into(),
            config,
            channels,
            rng,
            ready_clock: AtomicU32::new(0),
            trigger_sink: None,
        }
    }

    /// Raise an interrupt trigger signal, as firmware would.
    pub fn fire_trigger(&self) {
        if let Some(sink) = &self.trigger_sink {
            let _ = sink.send(TriggerSignal {
                module: self.name.clone(),
                channel: "trigger".to_string(),
            });
        }
    }

    fn synth_trace(&mut self) -> Vec<u32> {
        let SimConfig {
            trace_len,
            baseline,
            pulse_height,
            noise,
            ..
        } = self.config;
        let mut trace = Vec::with_capacity(trace_len);
        for _ in 0..trace_len {
            let jitter = if noise > 0 {
                self.rng.gen_range(0..=2 * noise)
            } else {
                noise
            };
            trace.push(baseline + jitter);
        }
        // Triangular pulse somewhere in the middle half of the trace.
        if trace_len >= 8 {
            let peak = self.rng.gen_range(trace_len / 4..trace_len * 3 / 4);
            let half = 3usize;
            for (offset, value) in trace.iter_mut().enumerate() {
                let distance = peak.abs_diff(offset);
                if distance <= half {
                    let scale = (half - distance + 1) as u32;
                    *value += pulse_height * scale / (half as u32 + 1);
                }
            }
        }
        trace
    }
}

impl DaqModule for SimDigitizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    fn reset(&mut self) -> AppResult<()> {
        self.ready_clock.store(0, Ordering::Relaxed);
        for channel in &self.channels {
            channel.buffer().clear();
        }
        Ok(())
    }

    fn configure(&mut self) -> AppResult<()> {
        debug!(module = %self.name, channels = self.channels.len(), "simulated digitizer configured");
        Ok(())
    }

    fn acquire(&mut self) -> AppResult<()> {
        for i in 0..self.channels.len() {
            if !self.channels[i].enabled() || self.channels[i].kind().is_trigger() {
                continue;
            }
            let trace = self.synth_trace();
            self.channels[i].buffer().put(trace);
        }
        Ok(())
    }

    fn data_ready(&self) -> bool {
        let interval = self.config.ready_interval.max(1);
        let count = self.ready_clock.fetch_add(1, Ordering::Relaxed) + 1;
        count % interval == 0
    }

    fn set_trigger_sink(&mut self, sink: TriggerSender) {
        self.trigger_sink = Some(sink);
    }

    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        if let Some(v) = group.get_usize("trace_len") {
            self.config.trace_len = v.max(8);
        }
        if let Some(v) = group.get_u64("ready_interval") {
            self.config.ready_interval = v.clamp(1, u64::from(u32::MAX)) as u32;
        }
        if let Some(v) = group.get_u64("baseline") {
            self.config.baseline = v.min(u64::from(u32::MAX)) as u32;
        }
        if let Some(v) = group.get_u64("pulse_height") {
            self.config.pulse_height = v.min(u64::from(u32::MAX)) as u32;
        }
    }

    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        group.set_i64("trace_len", self.config.trace_len as i64);
        group.set_i64("ready_interval", i64::from(self.config.ready_interval));
        group.set_i64("baseline", i64::from(self.config.baseline));
        group.set_i64("pulse_height", i64::from(self.config.pulse_height));
    }
}
