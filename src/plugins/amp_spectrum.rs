//! Amplitude spectrum plugin.
//!
//! Histograms pulse amplitudes from raw traces. Per cycle: estimate the
//! baseline from the leading samples, pick the extremum farther from the
//! baseline (which also fixes the pulse polarity), reject clipped or
//! boundary pulses, then average a small window around the extremum and
//! increment the matching histogram bucket.

use crate::data::Payload;
use crate::error::AppResult;
use crate::graph::{Plugin, PortIo, PortSpec};
use crate::settings::{SettingsGroup, SettingsGroupMut};
use tracing::debug;

/// Number of histogram buckets; bucket index equals amplitude in counts.
pub const SPECTRUM_BINS: usize = 4096;

/// Saturation value of a 12-bit sample.
const CLIP_HIGH: f64 = 4095.0;

#[derive(Debug, Clone)]
pub struct AmpSpectrumConfig {
    /// Averaging window around the extremum, forced odd.
    pub width: usize,
    /// Number of leading samples used for the baseline estimate.
    pub points_for_baseline: usize,
}

impl Default for AmpSpectrumConfig {
    fn default() -> Self {
        Self {
            width: 3,
            points_for_baseline: 10,
        }
    }
}

/// Builds an amplitude histogram over many cycles.
pub struct AmpSpectrumPlugin {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    config: AmpSpectrumConfig,
    histogram: Vec<f64>,
    low_clips: u64,
    high_clips: u64,
}

impl Default for AmpSpectrumPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AmpSpectrumPlugin {
    pub fn new() -> Self {
        Self {
            inputs: vec![PortSpec::u32("in")],
            outputs: vec![PortSpec::f64("spectrum")],
            config: AmpSpectrumConfig::default(),
            histogram: vec![0.0; SPECTRUM_BINS],
            low_clips: 0,
            high_clips: 0,
        }
    }

    /// Registry constructor. No attributes.
    pub fn factory(_name: &str, _attrs: &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>> {
        Ok(Box::new(Self::new()))
    }

    /// Set the averaging window, corrected up to the next odd value.
    pub fn set_width(&mut self, width: usize) {
        let width = width.max(1);
        self.config.width = if width % 2 == 0 { width + 1 } else { width };
    }

    pub fn set_points_for_baseline(&mut self, points: usize) {
        self.config.points_for_baseline = points.max(1);
    }

    pub fn histogram(&self) -> &[f64] {
        &self.histogram
    }

    pub fn low_clips(&self) -> u64 {
        self.low_clips
    }

    pub fn high_clips(&self) -> u64 {
        self.high_clips
    }
}

impl Plugin for AmpSpectrumPlugin {
    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        let Some(samples) = io.input(0).and_then(Payload::as_u32) else {
            return Ok(());
        };
        if samples.is_empty() {
            return Ok(());
        }
        let data: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

        let points = self.config.points_for_baseline.max(1);
        let lead: f64 = data.iter().take(points).sum();
        let baseline = lead / points as f64;

        let mut min = (0usize, data[0]);
        let mut max = (0usize, data[0]);
        for (i, &v) in data.iter().enumerate() {
            if v < min.1 {
                min = (i, v);
            }
            if v > max.1 {
                max = (i, v);
            }
        }

        // Polarity follows whichever extreme sits farther from the baseline.
        let (polarity, peak_idx, peak_val) = if (baseline - min.1) < (max.1 - baseline) {
            (1.0, max.0, max.1)
        } else {
            (-1.0, min.0, min.1)
        };

        // A pulse peaking on the trace boundary cannot be measured.
        if peak_idx == 0 || peak_idx == data.len() - 1 {
            debug!("extremum on trace boundary, event rejected");
            return Ok(());
        }

        // A flat top at the converter limits means the pulse clipped.
        if peak_val >= CLIP_HIGH {
            if data[peak_idx - 1] == peak_val || data[peak_idx + 1] == peak_val {
                self.high_clips += 1;
                return Ok(());
            }
        } else if peak_val == 0.0
            && (data[peak_idx - 1] == peak_val || data[peak_idx + 1] == peak_val)
        {
            self.low_clips += 1;
            return Ok(());
        }

        // Average over the extremum to get a stable amplitude.
        let half = self.config.width / 2;
        let from = peak_idx.saturating_sub(half);
        let to = (peak_idx + half).min(data.len() - 1);
        let sum: f64 = data[from..=to].iter().map(|v| v - baseline).sum();
        let amplitude = sum / self.config.width as f64 * polarity;

        let bucket = amplitude.round();
        if bucket >= 1.0 && bucket <= (SPECTRUM_BINS - 2) as f64 {
            self.histogram[bucket as usize] += 1.0;
        }

        io.publish(0, Payload::from_f64(self.histogram.clone()));
        Ok(())
    }

    fn reset(&mut self) {
        self.histogram = vec![0.0; SPECTRUM_BINS];
        self.low_clips = 0;
        self.high_clips = 0;
    }

    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        if let Some(width) = group.get_usize("width") {
            self.set_width(width);
        }
        if let Some(points) = group.get_usize("points_for_baseline") {
            self.set_points_for_baseline(points);
        }
    }

    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        group.set_i64("width", self.config.width as i64);
        group.set_i64("points_for_baseline", self.config.points_for_baseline as i64);
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

    fn run_once(plugin: &mut AmpSpectrumPlugin, trace: Vec<u32>) -> Option<Payload> {
        let inputs = vec![Some(Payload::from_u32(trace))];
        let mut outputs = vec![None];
        plugin
            .run_cycle(&mut PortIo::new(&inputs, &mut outputs))
            .unwrap();
        outputs.into_iter().next().flatten()
    }

    fn flat_trace_with(len: usize, level: u32, spikes: &[(usize, u32)]) -> Vec<u32> {
        let mut trace = vec![level; len];
        for &(at, value) in spikes {
            trace[at] = value;
        }
        trace
    }

    #[test]
    fn single_extremum_lands_in_one_bucket() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_width(1);
        plugin.set_points_for_baseline(4);

        // Baseline 100, peak 600: amplitude 500 above baseline.
        let trace = flat_trace_with(16, 100, &[(8, 600)]);
        let spectrum = run_once(&mut plugin, trace).unwrap();

        assert_eq!(plugin.histogram()[500], 1.0);
        assert_eq!(plugin.histogram().iter().sum::<f64>(), 1.0);
        assert_eq!(spectrum.as_f64().unwrap()[500], 1.0);
    }

    #[test]
    fn negative_pulses_use_inverted_polarity() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_width(1);
        plugin.set_points_for_baseline(4);

        let trace = flat_trace_with(16, 100, &[(8, 20)]);
        run_once(&mut plugin, trace).unwrap();
        assert_eq!(plugin.histogram()[80], 1.0);
    }

    #[test]
    fn window_average_spreads_over_width() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_width(3);
        plugin.set_points_for_baseline(4);

        // Peak at index 8, shoulders one count below: the window mean
        // lands back on the full height after rounding.
        let trace = flat_trace_with(16, 100, &[(7, 599), (8, 600), (9, 599)]);
        run_once(&mut plugin, trace).unwrap();
        // (499 + 500 + 499) / 3 rounds to 499.
        assert_eq!(plugin.histogram()[499], 1.0);
    }

    #[test]
    fn saturated_pulse_counts_as_high_clip() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_points_for_baseline(4);

        let trace = flat_trace_with(16, 100, &[(8, 4095), (9, 4095)]);
        let spectrum = run_once(&mut plugin, trace);

        assert_eq!(plugin.high_clips(), 1);
        assert_eq!(plugin.histogram().iter().sum::<f64>(), 0.0);
        // A rejected event publishes nothing.
        assert!(spectrum.is_none());
    }

    #[test]
    fn floor_pulse_counts_as_low_clip() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_points_for_baseline(4);

        let trace = flat_trace_with(16, 100, &[(8, 0), (9, 0)]);
        let spectrum = run_once(&mut plugin, trace);

        assert_eq!(plugin.low_clips(), 1);
        assert!(spectrum.is_none());
    }

    #[test]
    fn boundary_extremum_is_rejected() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_points_for_baseline(4);

        let trace = flat_trace_with(16, 100, &[(15, 900)]);
        let spectrum = run_once(&mut plugin, trace);

        assert!(spectrum.is_none());
        assert_eq!(plugin.histogram().iter().sum::<f64>(), 0.0);
        assert_eq!(plugin.high_clips(), 0);
    }

    #[test]
    fn even_width_is_corrected_to_odd() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_width(4);
        assert_eq!(plugin.config.width, 5);
    }

    #[test]
    fn reset_clears_spectrum_and_clip_counters() {
        let mut plugin = AmpSpectrumPlugin::new();
        plugin.set_width(1);
        plugin.set_points_for_baseline(4);

        run_once(&mut plugin, flat_trace_with(16, 100, &[(8, 600)]));
        run_once(&mut plugin, flat_trace_with(16, 100, &[(8, 4095), (9, 4095)]));
        assert_eq!(plugin.histogram()[500], 1.0);
        assert_eq!(plugin.high_clips(), 1);

        plugin.reset();
        assert_eq!(plugin.histogram().iter().sum::<f64>(), 0.0);
        assert_eq!(plugin.high_clips(), 0);
        // Configuration survives a reset.
        assert_eq!(plugin.config.width, 1);
    }
}
