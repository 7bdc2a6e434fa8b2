//! Event builder: the terminal plugin that persists and mirrors events.
//!
//! Each cycle, the non-empty input channels are assembled into one event
//! record. The record is encoded exactly once and the same bytes go to
//! the current run file and to a loopback datagram, so both sinks always
//! agree on a cycle's content.
//!
//! Files rotate: a new file opens when none is open, when the run
//! directory changes, or when the current file has accumulated the
//! rotation threshold (1 GiB by default). Filenames are
//! `<prefix>_<yyMMdd_HHMMSS>_<seq>.dat` with a four-digit sequence that
//! restarts per run. When the run directory is missing the cycle's record
//! is dropped from both sinks with a logged diagnostic; acquisition is
//! never stalled by storage.

use crate::data::Payload;
use crate::error::AppResult;
use crate::event::EventRecord;
use crate::graph::{Plugin, PortIo, PortSpec};
use crate::run::RunInfo;
use crate::settings::{SettingsGroup, SettingsGroupMut};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default destination port of the event datagram mirror.
pub const DEFAULT_EVENT_PORT: u16 = 40000;

/// Default file rotation threshold.
pub const DEFAULT_ROTATE_BYTES: u64 = 1024 * 1024 * 1024;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Bytes written to the current file and over the whole run. Updated
/// after every record, shared read-only with observers.
#[derive(Debug, Default)]
pub struct ByteCounters {
    current: AtomicU64,
    total: AtomicU64,
}

impl ByteCounters {
    /// Bytes written to the currently open file.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Bytes written since the run started.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn add(&self, bytes: u64) {
        self.current.fetch_add(bytes, Ordering::Relaxed);
        self.total.fetch_add(bytes, Ordering::Relaxed);
    }

    fn reset_current(&self) {
        self.current.store(0, Ordering::Relaxed);
    }

    fn reset_all(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }
}

/// Serializes the cycle's channel buffers to rotating files and a
/// loopback datagram stream.
pub struct EventBuilderPlugin {
    name: String,
    inputs: Vec<PortSpec>,
    prefix: String,
    port: u16,
    rotate_bytes: u64,
    run_dir: Option<PathBuf>,
    file: Option<File>,
    file_seq: u32,
    open_new_file: bool,
    socket: Option<UdpSocket>,
    counters: Arc<ByteCounters>,
    last_report: Instant,
}

impl EventBuilderPlugin {
    /// A builder with `n_inputs` unsigned-sample inputs named `in 0`,
    /// `in 1` and so on.
    pub fn new(name: impl Into<String>, n_inputs: usize) -> Self {
        let n_inputs = n_inputs.max(1);
        let inputs = (0..n_inputs)
            .map(|i| PortSpec::u32(format!("in {i}")))
            .collect();
        Self {
            name: name.into(),
            inputs,
            prefix: "run".to_string(),
            port: DEFAULT_EVENT_PORT,
            rotate_bytes: DEFAULT_ROTATE_BYTES,
            run_dir: None,
            file: None,
            file_seq: 0,
            open_new_file: true,
            socket: None,
            counters: Arc::new(ByteCounters::default()),
            last_report: Instant::now(),
        }
    }

    /// Registry constructor. Attributes: `inputs` (default 4).
    pub fn factory(name: &str, attrs: &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>> {
        let n_inputs = match attrs.get_usize("inputs") {
            Some(0) | None => {
                if attrs.get_i64("inputs").is_some() {
                    warn!(plugin = name, "invalid input count, using 1");
                    1
                } else {
                    4
                }
            }
            Some(n) => n,
        };
        Ok(Box::new(Self::new(name, n_inputs)))
    }

    /// Shared byte counters for status reporting.
    pub fn byte_counters(&self) -> Arc<ByteCounters> {
        Arc::clone(&self.counters)
    }

    /// Point the builder at a different output directory. The next cycle
    /// opens a new file there.
    pub fn set_run_dir(&mut self, dir: impl Into<PathBuf>) {
        self.run_dir = Some(dir.into());
        self.open_new_file = true;
    }

    fn file_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{:04}.dat",
            self.prefix,
            now.format("%y%m%d_%H%M%S"),
            self.file_seq
        )
    }

    /// Close the current file and open the next one in sequence, if the
    /// run directory is available.
    fn reopen(&mut self) {
        self.file = None;
        let Some(dir) = self.run_dir.clone() else {
            warn!(plugin = %self.name, "no run directory set, dropping records");
            return;
        };
        if !dir.is_dir() {
            warn!(
                plugin = %self.name,
                dir = %dir.display(),
                "output directory does not exist, dropping records"
            );
            return;
        }
        let path = dir.join(self.file_name(Utc::now()));
        match File::create(&path) {
            Ok(file) => {
                info!(plugin = %self.name, file = %path.display(), "opened event file");
                self.file = Some(file);
                self.counters.reset_current();
                self.file_seq += 1;
                self.open_new_file = false;
            }
            Err(e) => {
                warn!(
                    plugin = %self.name,
                    file = %path.display(),
                    error = %e,
                    "cannot open event file, dropping records"
                );
            }
        }
    }

    fn mirror(&mut self, bytes: &[u8]) {
        if self.socket.is_none() {
            match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
                Ok(socket) => self.socket = Some(socket),
                Err(e) => {
                    debug!(plugin = %self.name, error = %e, "cannot bind event mirror socket");
                    return;
                }
            }
        }
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.send_to(bytes, (Ipv4Addr::LOCALHOST, self.port)) {
                debug!(plugin = %self.name, error = %e, "event datagram not sent");
            }
        }
    }
}

impl Plugin for EventBuilderPlugin {
    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &[]
    }

    // One populated input is enough to make an event worth writing.
    fn mandatory_inputs(&self) -> usize {
        1
    }

    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        let declared = self.inputs.len();
        let mut record = EventRecord::new(declared);
        for index in 0..declared {
            if let Some(samples) = io.input(index).and_then(Payload::as_u32) {
                record.set_channel(index, samples.to_vec());
            }
        }

        if self.counters.current() >= self.rotate_bytes {
            self.open_new_file = true;
        }
        if self.open_new_file {
            self.reopen();
        }
        if self.file.is_none() {
            debug!(plugin = %self.name, "no open file, record dropped");
            return Ok(());
        }

        let bytes = match record.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(plugin = %self.name, error = %e, "record not encodable, dropped");
                return Ok(());
            }
        };

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(&bytes) {
                warn!(plugin = %self.name, error = %e, "event file write failed, record dropped");
                self.open_new_file = true;
                return Ok(());
            }
        }
        self.mirror(&bytes);
        self.counters.add(bytes.len() as u64);

        if self.last_report.elapsed() >= REPORT_INTERVAL {
            debug!(
                plugin = %self.name,
                current_mbytes = self.counters.current() as f64 / 1024.0 / 1024.0,
                total_mbytes = self.counters.total() as f64 / 1024.0 / 1024.0,
                "event data written"
            );
            self.last_report = Instant::now();
        }
        Ok(())
    }

    fn run_started(&mut self, info: &RunInfo) {
        self.run_dir = Some(info.run_dir.clone());
        self.file = None;
        self.file_seq = 0;
        self.open_new_file = true;
        self.counters.reset_all();
        self.last_report = Instant::now();
    }

    fn run_stopped(&mut self) {
        self.file = None;
    }

    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        if let Some(prefix) = group.get_str("prefix") {
            self.prefix = prefix.to_string();
        }
        if let Some(port) = group.get_u16("port") {
            self.port = port;
        }
        if let Some(rotate) = group.get_u64("rotate_bytes") {
            self.rotate_bytes = rotate.max(1);
        }
    }

    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        group.set_str("prefix", &self.prefix);
        group.set_i64("port", i64::from(self.port));
        group.set_i64("rotate_bytes", self.rotate_bytes as i64);
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

    #[test]
    fn input_ports_are_numbered() {
        let plugin = EventBuilderPlugin::new("builder", 3);
        let names: Vec<&str> = plugin
            .input_ports()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["in 0", "in 1", "in 2"]);
        assert_eq!(plugin.mandatory_inputs(), 1);
    }

    #[test]
    fn zero_inputs_is_corrected() {
        let plugin = EventBuilderPlugin::new("builder", 0);
        assert_eq!(plugin.input_ports().len(), 1);
    }

    #[test]
    fn factory_defaults_to_four_inputs() {
        let attrs = toml::Table::new();
        let plugin =
            EventBuilderPlugin::factory("builder", &SettingsGroup::from_table(&attrs)).unwrap();
        assert_eq!(plugin.input_ports().len(), 4);
    }

    #[test]
    fn file_name_carries_prefix_and_sequence() {
        let mut plugin = EventBuilderPlugin::new("builder", 1);
        plugin.prefix = "cal".to_string();
        plugin.file_seq = 7;
        let now = Utc::now();
        let name = plugin.file_name(now);
        assert!(name.starts_with("cal_"));
        assert!(name.ends_with("_0007.dat"));
        // prefix + underscore + yyMMdd_HHmmss + underscore + seq + .dat
        assert_eq!(name.len(), "cal_".len() + 13 + "_0007.dat".len());
    }

    #[test]
    fn settings_round_trip() {
        let mut store = crate::settings::SettingsStore::new();
        let mut plugin = EventBuilderPlugin::new("builder", 2);
        plugin.prefix = "beam".to_string();
        plugin.port = 41000;
        plugin.rotate_bytes = 4096;
        plugin.save_settings(&mut store.group_mut("builder"));

        let mut other = EventBuilderPlugin::new("builder", 2);
        other.apply_settings(&store.group("builder"));
        assert_eq!(other.prefix, "beam");
        assert_eq!(other.port, 41000);
        assert_eq!(other.rotate_bytes, 4096);
    }
}
