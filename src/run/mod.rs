//! Run control: the scheduler thread, its state machine and status
//! reporting.

pub mod scheduler;
pub mod status;

pub use scheduler::{spawn, RunHandle, RunOptions, RunOutcome, TriggerSender, TriggerSignal};
pub use status::{RunCounters, RunState, RunStatus, TriggerDiscipline};

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Immutable description of the active run, handed to plugins at start.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// Name of the run.
    pub run_name: String,
    /// Directory receiving the run's output files.
    pub run_dir: PathBuf,
    /// When the run started.
    pub started: DateTime<Utc>,
}
