//! Run state, counters and coalesced status snapshots.
//!
//! Observers never share state with the scheduler thread. They receive
//! immutable [`RunStatus`] snapshots through a watch channel, refreshed at
//! most about twice a second while a run is active, plus the two atomic
//! throughput counters which are safe to read at any time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Minimum interval between coalesced status snapshots.
pub(crate) const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunState {
    #[default]
    Idle,
    Configuring,
    Running,
    Stopping,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Configuring => "configuring",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
        }
    }
}

/// How trigger readiness is detected during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerDiscipline {
    /// Block on trigger signals raised by the modules.
    Interrupt,
    /// Scan trigger channels in a busy loop.
    Poll,
}

impl TriggerDiscipline {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDiscipline::Interrupt => "interrupt",
            TriggerDiscipline::Poll => "poll",
        }
    }
}

/// Monotonic throughput counters, shared read-only with observers.
#[derive(Debug, Default)]
pub struct RunCounters {
    polls: AtomicU64,
    events: AtomicU64,
}

impl RunCounters {
    /// Total poll-loop iterations.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Total successful acquisition cycles.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub(crate) fn add_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
}

/// One coalesced status snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    /// Resolved discipline, set once configuration is done.
    pub discipline: Option<TriggerDiscipline>,
    pub run_name: String,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub events: u64,
    pub polls: u64,
    /// Acquisition cycles per second over the last snapshot interval.
    pub event_rate: f64,
}
