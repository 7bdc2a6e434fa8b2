//! Signal extraction plugin.
//!
//! Cuts fixed-width signal windows out of a long trace wherever a trigger
//! mask has a mark, averages them into one shape, and reports the
//! baseline computed from the trigger-free part of the trace. Marks too
//! close to another mark are suppressed so overlapping windows never mix.

use crate::data::Payload;
use crate::error::AppResult;
use crate::graph::{Plugin, PortIo, PortSpec};
use crate::settings::{SettingsGroup, SettingsGroupMut};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ExtractSignalConfig {
    /// Samples per extracted window.
    pub width: usize,
    /// Samples of the window placed before the trigger mark.
    pub offset: usize,
    /// Negate the averaged signal and the baseline.
    pub invert: bool,
}

impl Default for ExtractSignalConfig {
    fn default() -> Self {
        Self {
            width: 50,
            offset: 5,
            invert: true,
        }
    }
}

/// Averages trigger-aligned windows from a trace into one signal shape.
pub struct ExtractSignalPlugin {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    config: ExtractSignalConfig,
}

impl Default for ExtractSignalPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractSignalPlugin {
    pub fn new() -> Self {
        Self {
            inputs: vec![PortSpec::f64("trigger"), PortSpec::f64("signal")],
            outputs: vec![PortSpec::f64("shape"), PortSpec::f64("baseline")],
            config: ExtractSignalConfig::default(),
        }
    }

    /// Registry constructor. No attributes.
    pub fn factory(_name: &str, _attrs: &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>> {
        Ok(Box::new(Self::new()))
    }

    pub fn set_width(&mut self, width: usize) {
        self.config.width = width.max(1);
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.config.offset = offset;
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.config.invert = invert;
    }
}

impl Plugin for ExtractSignalPlugin {
    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        let Some(trigger) = io.input(0).and_then(Payload::as_f64) else {
            return Ok(());
        };
        let Some(data) = io.input(1).and_then(Payload::as_f64) else {
            return Ok(());
        };
        if trigger.len() != data.len() {
            warn!(
                trigger_len = trigger.len(),
                data_len = data.len(),
                "trigger mask and trace differ in length, cycle skipped"
            );
            return Ok(());
        }

        let n = data.len();
        let width = self.config.width;
        let offset = self.config.offset as isize;

        // Baseline mask: everything outside the signal windows. Allowed
        // mask: marks far enough from every other mark; when two marks
        // collide within the window width the later one wins.
        let mut baseline_mask = vec![true; n];
        let mut allowed = vec![false; n];
        for i in 0..n {
            if trigger[i] != 1.0 {
                continue;
            }
            allowed[i] = true;
            for j in -offset..(width as isize - offset) {
                let at = i as isize + j;
                if at >= 0 && (at as usize) < n {
                    baseline_mask[at as usize] = false;
                }
            }
            for j in -(width as isize)..(width as isize) {
                if j == 0 {
                    continue;
                }
                let at = i as isize + j;
                if at >= 0 && (at as usize) < n {
                    allowed[at as usize] = false;
                }
            }
        }

        let mut baseline = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            if baseline_mask[i] {
                baseline += data[i];
                count += 1;
            }
        }
        if count > 0 {
            baseline /= count as f64;
        }

        let corrected: Vec<f64> = data.iter().map(|v| v - baseline).collect();

        // Average the complete windows at all allowed marks.
        let mut shape = vec![0.0; width];
        let mut windows = 0usize;
        for i in 0..n {
            if !allowed[i] {
                continue;
            }
            let start = i as isize - offset;
            if start < 0 || start as usize + width > n {
                continue;
            }
            let start = start as usize;
            for (k, slot) in shape.iter_mut().enumerate() {
                *slot += corrected[start + k];
            }
            windows += 1;
        }
        if windows > 0 {
            for slot in &mut shape {
                *slot /= windows as f64;
            }
        }

        if self.config.invert {
            for slot in &mut shape {
                *slot = -*slot;
            }
            baseline = -baseline;
        }

        io.publish(0, Payload::from_f64(shape));
        io.publish(1, Payload::from_f64(vec![baseline, count as f64]));
        Ok(())
    }

    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        if let Some(width) = group.get_usize("width") {
            self.set_width(width);
        }
        if let Some(offset) = group.get_usize("offset") {
            self.set_offset(offset);
        }
        if let Some(invert) = group.get_bool("invert") {
            self.set_invert(invert);
        }
    }

    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        group.set_i64("width", self.config.width as i64);
        group.set_i64("offset", self.config.offset as i64);
        group.set_bool("invert", self.config.invert);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_once(
        plugin: &mut ExtractSignalPlugin,
        trigger: Vec<f64>,
        data: Vec<f64>,
    ) -> (Vec<f64>, Vec<f64>) {
        let inputs = vec![
            Some(Payload::from_f64(trigger)),
            Some(Payload::from_f64(data)),
        ];
        let mut outputs = vec![None, None];
        plugin
            .run_cycle(&mut PortIo::new(&inputs, &mut outputs))
            .unwrap();
        let shape = outputs[0]
            .as_ref()
            .and_then(Payload::as_f64)
            .unwrap_or(&[])
            .to_vec();
        let baseline = outputs[1]
            .as_ref()
            .and_then(Payload::as_f64)
            .unwrap_or(&[])
            .to_vec();
        (shape, baseline)
    }

    #[test]
    fn single_mark_extracts_spike_at_offset() {
        let mut plugin = ExtractSignalPlugin::new();
        plugin.set_width(4);
        plugin.set_offset(2);
        plugin.set_invert(false);

        let n = 32;
        let mut trigger = vec![0.0; n];
        trigger[8] = 1.0;
        let mut data = vec![50.0; n];
        data[8] = 70.0;

        let (shape, baseline) = run_once(&mut plugin, trigger, data);

        // Baseline comes from samples outside the window, all at 50.
        assert!((baseline[0] - 50.0).abs() < 1e-12);
        assert_eq!(baseline[1], (n - 4) as f64);

        // The window covers [6, 10); the spike sits at its offset.
        assert_eq!(shape.len(), 4);
        assert!((shape[2] - 20.0).abs() < 1e-12);
        for (k, value) in shape.iter().enumerate() {
            if k != 2 {
                assert!(value.abs() < 1e-12, "shape[{k}] = {value}");
            }
        }
    }

    #[test]
    fn invert_negates_shape_and_baseline() {
        let mut plugin = ExtractSignalPlugin::new();
        plugin.set_width(4);
        plugin.set_offset(2);
        plugin.set_invert(true);

        let n = 32;
        let mut trigger = vec![0.0; n];
        trigger[8] = 1.0;
        let mut data = vec![50.0; n];
        data[8] = 70.0;

        let (shape, baseline) = run_once(&mut plugin, trigger, data);
        assert!((baseline[0] + 50.0).abs() < 1e-12);
        assert!((shape[2] + 20.0).abs() < 1e-12);
    }

    #[test]
    fn close_marks_suppress_the_earlier_one() {
        let mut plugin = ExtractSignalPlugin::new();
        plugin.set_width(4);
        plugin.set_offset(0);
        plugin.set_invert(false);

        let n = 32;
        let mut trigger = vec![0.0; n];
        trigger[10] = 1.0;
        trigger[12] = 1.0;
        let mut data = vec![0.0; n];
        // Distinct markers inside each candidate window.
        data[10] = 3.0;
        data[12] = 9.0;

        let (shape, baseline) = run_once(&mut plugin, trigger, data);

        // Only the window at the later mark survives.
        assert!(shape[0] > 8.0, "shape[0] = {}", shape[0]);
        assert!(baseline[1] > 0.0);
    }

    #[test]
    fn two_distant_marks_average_their_windows() {
        let mut plugin = ExtractSignalPlugin::new();
        plugin.set_width(2);
        plugin.set_offset(0);
        plugin.set_invert(false);

        let n = 64;
        let mut trigger = vec![0.0; n];
        trigger[10] = 1.0;
        trigger[40] = 1.0;
        let mut data = vec![0.0; n];
        data[10] = 4.0;
        data[40] = 8.0;

        let (shape, _) = run_once(&mut plugin, trigger, data);
        // Mean of the two spikes at the window start.
        assert!((shape[0] - 6.0).abs() < 1e-9);
        assert!(shape[1].abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_skip_the_cycle() {
        let mut plugin = ExtractSignalPlugin::new();
        let inputs = vec![
            Some(Payload::from_f64(vec![0.0; 4])),
            Some(Payload::from_f64(vec![0.0; 8])),
        ];
        let mut outputs = vec![None, None];
        plugin
            .run_cycle(&mut PortIo::new(&inputs, &mut outputs))
            .unwrap();
        assert!(outputs[0].is_none());
        assert!(outputs[1].is_none());
    }

    #[test]
    fn mark_windows_are_excluded_from_baseline() {
        let mut plugin = ExtractSignalPlugin::new();
        plugin.set_width(4);
        plugin.set_offset(2);
        plugin.set_invert(false);

        let n = 16;
        let mut trigger = vec![0.0; n];
        trigger[8] = 1.0;
        // A wild value inside the window must not pollute the baseline.
        let mut data = vec![10.0; n];
        data[7] = 1000.0;

        let (_, baseline) = run_once(&mut plugin, trigger, data);
        assert!((baseline[0] - 10.0).abs() < 1e-12);
        assert_eq!(baseline[1], 12.0);
    }
}
