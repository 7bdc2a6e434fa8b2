//! The run thread: one acquisition cycle per ready trigger.
//!
//! A run owns its modules and its graph for the whole acquisition; both
//! move onto a dedicated thread and come back in the [`RunOutcome`] when
//! the run ends. Within a cycle, hardware readout is serialized in
//! acquisition-set order, then the graph is evaluated once. Nothing else
//! runs in the scheduler context.
//!
//! Two trigger disciplines exist and exactly one is active per run:
//!
//! - **Poll**: a busy loop scans every enabled trigger channel round-robin
//!   and fires a cycle for each ready one. The loop never sleeps and is
//!   bounded only by the abort flag, which it rechecks once per iteration.
//! - **Interrupt**: the thread blocks on the trigger signal channel;
//!   modules raise signals from their own contexts. `stop()` posts a stop
//!   message so the blocking wait always ends promptly.
//!
//! When enabled trigger channels request both disciplines, the run
//! downgrades to polling and warns once; polling also covers interrupt
//! hardware, the reverse does not hold.

use crate::error::{AppResult, DaqError};
use crate::graph::Graph;
use crate::hardware::{ChannelKind, DaqModule, TriggerMode};
use crate::run::status::{RunCounters, RunState, RunStatus, TriggerDiscipline, STATUS_INTERVAL};
use crate::run::RunInfo;
use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// A trigger raised by a module in interrupt mode.
#[derive(Debug, Clone)]
pub struct TriggerSignal {
    pub module: String,
    pub channel: String,
}

/// Sender half handed to modules that raise interrupt triggers.
pub type TriggerSender = Sender<TriggerSignal>;

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Name of the run, used in status reports.
    pub run_name: String,
    /// Directory receiving the run's output files.
    pub run_dir: PathBuf,
}

impl RunOptions {
    pub fn new(run_name: impl Into<String>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_name: run_name.into(),
            run_dir: run_dir.into(),
        }
    }
}

/// Everything a finished run hands back to the caller.
pub struct RunOutcome {
    pub graph: Graph,
    pub modules: Vec<Box<dyn DaqModule>>,
    pub polls: u64,
    pub events: u64,
}

/// Control surface of an active run.
pub struct RunHandle {
    thread: Option<std::thread::JoinHandle<RunOutcome>>,
    abort: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    trigger_tx: TriggerSender,
    counters: Arc<RunCounters>,
    status_rx: watch::Receiver<RunStatus>,
}

impl RunHandle {
    /// Request the run to end. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.abort.store(true, Ordering::Relaxed);
        let _ = self.stop_tx.try_send(());
    }

    /// Wait for the run thread to finish and take back its state.
    pub fn join(mut self) -> AppResult<RunOutcome> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| DaqError::Processing("run already joined".into()))?;
        thread
            .join()
            .map_err(|_| DaqError::Processing("run thread panicked".into()))
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }

    /// The run's throughput counters.
    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Subscribe to coalesced status snapshots.
    pub fn status(&self) -> watch::Receiver<RunStatus> {
        self.status_rx.clone()
    }

    /// Sender for raising interrupt triggers externally.
    pub fn trigger_sender(&self) -> TriggerSender {
        self.trigger_tx.clone()
    }
}

/// Start a run on a dedicated scheduler thread.
///
/// Modules and graph move into the run; they come back from
/// [`RunHandle::join`].
pub fn spawn(
    modules: Vec<Box<dyn DaqModule>>,
    graph: Graph,
    options: RunOptions,
) -> AppResult<RunHandle> {
    let abort = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = bounded(1);
    let (trigger_tx, trigger_rx) = unbounded();
    let counters = Arc::new(RunCounters::default());
    let (status_tx, status_rx) = watch::channel(RunStatus {
        run_name: options.run_name.clone(),
        ..RunStatus::default()
    });

    let ctx = RunCtx::new(
        modules,
        graph,
        options,
        Arc::clone(&abort),
        stop_rx,
        trigger_rx,
        trigger_tx.clone(),
        Arc::clone(&counters),
        status_tx,
    );

    let thread = std::thread::Builder::new()
        .name("run-thread".into())
        .spawn(move || ctx.run())?;

    Ok(RunHandle {
        thread: Some(thread),
        abort,
        stop_tx,
        trigger_tx,
        counters,
        status_rx,
    })
}

/// Index of one enabled trigger channel.
#[derive(Debug, Clone, Copy)]
struct TriggerRef {
    module: usize,
    channel: usize,
}

struct RunCtx {
    modules: Vec<Box<dyn DaqModule>>,
    graph: Graph,
    options: RunOptions,
    abort: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    trigger_rx: Receiver<TriggerSignal>,
    trigger_tx: TriggerSender,
    counters: Arc<RunCounters>,
    status_tx: watch::Sender<RunStatus>,
    status: RunStatus,
    triggers: Vec<TriggerRef>,
    acquisition: Vec<usize>,
    discipline: TriggerDiscipline,
    last_status: Instant,
    rate_marker: (u64, Instant),
}

impl RunCtx {
    #[allow(clippy::too_many_arguments)]
    fn new(
        modules: Vec<Box<dyn DaqModule>>,
        graph: Graph,
        options: RunOptions,
        abort: Arc<AtomicBool>,
        stop_rx: Receiver<()>,
        trigger_rx: Receiver<TriggerSignal>,
        trigger_tx: TriggerSender,
        counters: Arc<RunCounters>,
        status_tx: watch::Sender<RunStatus>,
    ) -> Self {
        let status = RunStatus {
            run_name: options.run_name.clone(),
            ..RunStatus::default()
        };
        Self {
            modules,
            graph,
            options,
            abort,
            stop_rx,
            trigger_rx,
            trigger_tx,
            counters,
            status_tx,
            status,
            triggers: Vec::new(),
            acquisition: Vec::new(),
            discipline: TriggerDiscipline::Poll,
            last_status: Instant::now(),
            rate_marker: (0, Instant::now()),
        }
    }

    fn run(mut self) -> RunOutcome {
        self.set_state(RunState::Configuring);
        self.configure();

        let info = RunInfo {
            run_name: self.options.run_name.clone(),
            run_dir: self.options.run_dir.clone(),
            started: Utc::now(),
        };
        self.graph.run_started(&info);
        self.status.started = Some(info.started);
        self.status.discipline = Some(self.discipline);
        self.set_state(RunState::Running);
        info!(
            run = %self.options.run_name,
            discipline = self.discipline.as_str(),
            "run started"
        );

        match self.discipline {
            TriggerDiscipline::Poll => self.poll_loop(),
            TriggerDiscipline::Interrupt => self.interrupt_loop(),
        }

        self.set_state(RunState::Stopping);
        self.graph.run_stopped();
        self.status.stopped = Some(Utc::now());
        self.set_state(RunState::Idle);
        info!(
            run = %self.options.run_name,
            events = self.counters.events(),
            polls = self.counters.polls(),
            "run stopped"
        );

        RunOutcome {
            polls: self.counters.polls(),
            events: self.counters.events(),
            graph: self.graph,
            modules: self.modules,
        }
    }

    /// Reset and configure every module, then classify enabled channels
    /// into the trigger list and the acquisition set.
    fn configure(&mut self) {
        for module in &mut self.modules {
            if let Err(e) = module.reset() {
                warn!(module = %module.name(), error = %e, "reset failed");
            }
            if let Err(e) = module.configure() {
                warn!(module = %module.name(), error = %e, "configure failed");
            }
        }

        let mut interrupt_based = false;
        let mut poll_based = false;
        self.triggers.clear();
        self.acquisition.clear();

        for (mi, module) in self.modules.iter().enumerate() {
            for (ci, channel) in module.channels().iter().enumerate() {
                if !channel.enabled() {
                    continue;
                }
                match channel.kind() {
                    ChannelKind::Trigger(mode) => {
                        self.triggers.push(TriggerRef {
                            module: mi,
                            channel: ci,
                        });
                        match mode {
                            TriggerMode::Interrupt => interrupt_based = true,
                            TriggerMode::Poll => poll_based = true,
                        }
                    }
                    _ => {
                        if !self.acquisition.contains(&mi) {
                            self.acquisition.push(mi);
                        }
                    }
                }
            }
        }

        if interrupt_based && poll_based {
            warn!("both interrupt and poll triggers enabled, defaulting to poll-based readout");
        }
        self.discipline = if interrupt_based && !poll_based {
            TriggerDiscipline::Interrupt
        } else {
            TriggerDiscipline::Poll
        };

        if self.triggers.is_empty() {
            warn!("no enabled trigger channels, run will idle until stopped");
        }

        if self.discipline == TriggerDiscipline::Interrupt {
            for &TriggerRef { module, .. } in &self.triggers {
                let sink = self.trigger_tx.clone();
                self.modules[module].set_trigger_sink(sink);
            }
        }
    }

    /// Busy loop over the trigger channels. Checks the abort flag once
    /// per iteration and never sleeps.
    fn poll_loop(&mut self) {
        while !self.abort.load(Ordering::Relaxed) {
            self.counters.add_poll();
            for i in 0..self.triggers.len() {
                let trigger = self.triggers[i];
                if self.modules[trigger.module].data_ready() {
                    trace!(
                        module = %self.modules[trigger.module].name(),
                        channel = %self.modules[trigger.module].channels()[trigger.channel].name(),
                        "trigger ready"
                    );
                    self.acquisition_cycle();
                }
            }
            self.publish_status(false);
        }
    }

    /// Block on trigger signals until stopped.
    fn interrupt_loop(&mut self) {
        let trigger_rx = self.trigger_rx.clone();
        let stop_rx = self.stop_rx.clone();
        loop {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            crossbeam_channel::select! {
                recv(trigger_rx) -> signal => {
                    if let Ok(signal) = signal {
                        debug!(module = %signal.module, channel = %signal.channel, "trigger signal");
                        self.acquisition_cycle();
                        self.publish_status(false);
                    } else {
                        break;
                    }
                }
                recv(stop_rx) -> _ => break,
            }
        }
    }

    /// Acquire every module in the acquisition set, then evaluate the
    /// graph once. A failing module only loses its own channels.
    fn acquisition_cycle(&mut self) {
        for &mi in &self.acquisition {
            if let Err(e) = self.modules[mi].acquire() {
                warn!(
                    module = %self.modules[mi].name(),
                    error = %e,
                    "acquire failed, channels left empty this cycle"
                );
            }
        }
        let stats = self.graph.run_cycle();
        self.counters.add_event();
        debug!(ran = stats.ran, skipped = stats.skipped, failed = stats.failed, "cycle evaluated");
    }

    fn set_state(&mut self, state: RunState) {
        self.status.state = state;
        self.publish_status(true);
    }

    /// Push a status snapshot, coalesced to the reporting interval
    /// unless forced by a state change.
    fn publish_status(&mut self, force: bool) {
        let now = Instant::now();
        if !force && now.duration_since(self.last_status) < STATUS_INTERVAL {
            return;
        }
        let events = self.counters.events();
        let (marker_events, marker_time) = self.rate_marker;
        let dt = now.duration_since(marker_time).as_secs_f64();
        if dt > 0.0 {
            self.status.event_rate = (events - marker_events) as f64 / dt;
        }
        self.status.events = events;
        self.status.polls = self.counters.polls();
        self.status_tx.send_replace(self.status.clone());
        self.last_status = now;
        self.rate_marker = (events, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimConfig, SimDigitizer};
    use crate::hardware::Channel;
    use crate::settings::{SettingsGroup, SettingsGroupMut};

    /// Module with an arbitrary channel list and always-ready data.
    struct TestModule {
        name: String,
        channels: Vec<Channel>,
    }

    impl DaqModule for TestModule {
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
            Ok(())
        }
        fn configure(&mut self) -> AppResult<()> {
            Ok(())
        }
        fn acquire(&mut self) -> AppResult<()> {
            Ok(())
        }
        fn data_ready(&self) -> bool {
            true
        }
        fn apply_settings(&mut self, _group: &SettingsGroup<'_>) {}
        fn save_settings(&self, _group: &mut SettingsGroupMut<'_>) {}
    }

    fn make_ctx(modules: Vec<Box<dyn DaqModule>>) -> RunCtx {
        let abort = Arc::new(AtomicBool::new(false));
        let (_stop_tx, stop_rx) = bounded(1);
        let (trigger_tx, trigger_rx) = unbounded();
        let (status_tx, _status_rx) = watch::channel(RunStatus::default());
        RunCtx::new(
            modules,
            Graph::new(),
            RunOptions::new("test", "/tmp"),
            abort,
            stop_rx,
            trigger_rx,
            trigger_tx,
            Arc::new(RunCounters::default()),
            status_tx,
        )
    }

    #[test]
    fn abort_before_start_runs_zero_cycles() {
        let module = SimDigitizer::new("sim0", SimConfig::default());
        let mut ctx = make_ctx(vec![Box::new(module)]);
        ctx.configure();
        ctx.abort.store(true, Ordering::Relaxed);
        ctx.poll_loop();
        assert_eq!(ctx.counters.polls(), 0);
        assert_eq!(ctx.counters.events(), 0);
    }

    #[test]
    fn mixed_trigger_kinds_resolve_to_poll() {
        let module = TestModule {
            name: "mixed".into(),
            channels: vec![
                Channel::new("irq", ChannelKind::Trigger(TriggerMode::Interrupt)),
                Channel::new("poll", ChannelKind::Trigger(TriggerMode::Poll)),
                Channel::new("trace", ChannelKind::Trace),
            ],
        };
        let mut ctx = make_ctx(vec![Box::new(module)]);
        ctx.configure();
        assert_eq!(ctx.discipline, TriggerDiscipline::Poll);
        assert_eq!(ctx.triggers.len(), 2);
    }

    #[test]
    fn interrupt_only_resolves_to_interrupt() {
        let module = TestModule {
            name: "irq".into(),
            channels: vec![
                Channel::new("irq", ChannelKind::Trigger(TriggerMode::Interrupt)),
                Channel::new("trace", ChannelKind::Trace),
            ],
        };
        let mut ctx = make_ctx(vec![Box::new(module)]);
        ctx.configure();
        assert_eq!(ctx.discipline, TriggerDiscipline::Interrupt);
    }

    #[test]
    fn disabled_channels_are_not_classified() {
        let mut module = TestModule {
            name: "half".into(),
            channels: vec![
                Channel::new("trg", ChannelKind::Trigger(TriggerMode::Poll)),
                Channel::new("trace0", ChannelKind::Trace),
                Channel::new("trace1", ChannelKind::Trace),
            ],
        };
        module.channels_mut()[0].set_enabled(false);
        module.channels_mut()[1].set_enabled(false);
        let mut ctx = make_ctx(vec![Box::new(module)]);
        ctx.configure();
        assert!(ctx.triggers.is_empty());
        // Module still acquires for the remaining enabled trace channel.
        assert_eq!(ctx.acquisition, vec![0]);
    }

    #[test]
    fn acquisition_set_holds_distinct_modules() {
        let module = TestModule {
            name: "multi".into(),
            channels: vec![
                Channel::new("trg", ChannelKind::Trigger(TriggerMode::Poll)),
                Channel::new("trace0", ChannelKind::Trace),
                Channel::new("trace1", ChannelKind::Trace),
                Channel::new("logic", ChannelKind::Logic),
            ],
        };
        let mut ctx = make_ctx(vec![Box::new(module)]);
        ctx.configure();
        assert_eq!(ctx.acquisition, vec![0]);
    }
}
