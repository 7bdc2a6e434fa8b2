//! Raw vector writer.
//!
//! Dumps each cycle's samples from one input, length-prefixed and
//! little-endian, into a single per-run file. Useful for capturing an
//! intermediate graph signal without the event record framing.

use crate::data::Payload;
use crate::error::AppResult;
use crate::graph::{Plugin, PortIo, PortSpec};
use crate::run::RunInfo;
use crate::settings::{SettingsGroup, SettingsGroupMut};
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct RawWritePlugin {
    name: String,
    inputs: Vec<PortSpec>,
    prefix: String,
    /// Output directory; falls back to the run directory when unset.
    dir: Option<PathBuf>,
    run_dir: Option<PathBuf>,
    file: Option<File>,
}

impl RawWritePlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: vec![PortSpec::u32("in")],
            prefix: "vector".to_string(),
            dir: None,
            run_dir: None,
            file: None,
        }
    }

    /// Registry constructor. No attributes.
    pub fn factory(name: &str, _attrs: &SettingsGroup<'_>) -> AppResult<Box<dyn Plugin>> {
        Ok(Box::new(Self::new(name)))
    }

    fn open_file(&mut self) {
        let Some(dir) = self.dir.clone().or_else(|| self.run_dir.clone()) else {
            warn!(plugin = %self.name, "no output directory, samples dropped");
            return;
        };
        if !dir.is_dir() {
            warn!(
                plugin = %self.name,
                dir = %dir.display(),
                "output directory does not exist, samples dropped"
            );
            return;
        }
        let path = dir.join(format!(
            "{}_{}.dat",
            self.prefix,
            Utc::now().format("%y%m%d_%H%M")
        ));
        match File::create(&path) {
            Ok(file) => {
                info!(plugin = %self.name, file = %path.display(), "opened raw output file");
                self.file = Some(file);
            }
            Err(e) => {
                warn!(plugin = %self.name, file = %path.display(), error = %e, "cannot open raw output file");
            }
        }
    }
}

impl Plugin for RawWritePlugin {
    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &[]
    }

    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        let Some(samples) = io.input(0).and_then(Payload::as_u32) else {
            return Ok(());
        };
        if self.file.is_none() {
            self.open_file();
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut buf = Vec::with_capacity(4 + samples.len() * 4);
        buf.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        for &sample in samples {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        if let Err(e) = file.write_all(&buf) {
            warn!(plugin = %self.name, error = %e, "raw write failed, samples dropped");
            self.file = None;
        }
        Ok(())
    }

    fn run_started(&mut self, info: &RunInfo) {
        self.run_dir = Some(info.run_dir.clone());
        self.file = None;
    }

    fn run_stopped(&mut self) {
        self.file = None;
    }

    fn apply_settings(&mut self, group: &SettingsGroup<'_>) {
        if let Some(prefix) = group.get_str("prefix") {
            self.prefix = prefix.to_string();
        }
        if let Some(dir) = group.get_str("dir") {
            self.dir = Some(PathBuf::from(dir));
        }
    }

    fn save_settings(&self, group: &mut SettingsGroupMut<'_>) {
        group.set_str("prefix", &self.prefix);
        if let Some(dir) = &self.dir {
            group.set_str("dir", &dir.to_string_lossy());
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
