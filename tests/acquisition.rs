//! End-to-end runs: scheduler thread, modules, graph and status path.

use scope_daq::error::AppResult;
use scope_daq::graph::{Graph, Plugin, PortIo, PortSpec};
use scope_daq::hardware::sim::{SimConfig, SimDigitizer};
use scope_daq::hardware::{Channel, ChannelKind, DaqModule, TriggerMode};
use scope_daq::plugins::bind_module_sources;
use scope_daq::run::{self, RunOptions, RunState, TriggerDiscipline, TriggerSignal};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Records the length of every payload it receives.
struct LenRecorder {
    inputs: Vec<PortSpec>,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl LenRecorder {
    fn new() -> (Self, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inputs: vec![PortSpec::u32("in")],
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl Plugin for LenRecorder {
    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn output_ports(&self) -> &[PortSpec] {
        &[]
    }
    fn run_cycle(&mut self, io: &mut PortIo<'_>) -> AppResult<()> {
        if let Some(value) = io.input(0) {
            self.seen.lock().unwrap().push(value.len());
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Module with configurable channels that never signals readiness.
struct QuietModule {
    channels: Vec<Channel>,
}

impl DaqModule for QuietModule {
    fn name(&self) -> &str {
        "quiet"
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
        false
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) {
    let start = Instant::now();
    while !check() {
        assert!(start.elapsed() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn poll_run_acquires_and_feeds_the_graph() {
    let sim = SimDigitizer::new(
        "sim0",
        SimConfig {
            ready_interval: 8,
            trace_len: 64,
            ..SimConfig::default()
        },
    );

    let mut graph = Graph::new();
    bind_module_sources(&mut graph, &sim).unwrap();
    let (recorder, seen) = LenRecorder::new();
    graph.add_plugin("recorder", Box::new(recorder)).unwrap();
    graph
        .connect("sim0/trace0", "out", "recorder", "in")
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let handle = run::spawn(
        vec![Box::new(sim)],
        graph,
        RunOptions::new("poll-test", dir.path()),
    )
    .unwrap();
    let status = handle.status();

    wait_until(Duration::from_secs(5), || handle.counters().events() >= 3);
    handle.stop();
    let outcome = handle.join().unwrap();

    assert!(outcome.events >= 3);
    // Readiness comes every 8th poll, so polling outpaces events.
    assert!(outcome.polls > outcome.events);

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.state, RunState::Idle);
    assert_eq!(snapshot.discipline, Some(TriggerDiscipline::Poll));
    assert_eq!(snapshot.run_name, "poll-test");
    assert!(snapshot.started.is_some());
    assert!(snapshot.stopped.is_some());

    // The graph actually saw the acquired traces.
    let seen = seen.lock().unwrap();
    assert!(seen.len() >= 3);
    assert!(seen.iter().all(|&len| len == 64));
}

#[test]
fn interrupt_run_fires_one_cycle_per_signal() {
    let sim = SimDigitizer::new(
        "sim0",
        SimConfig {
            trigger_mode: TriggerMode::Interrupt,
            trace_len: 32,
            ..SimConfig::default()
        },
    );

    let mut graph = Graph::new();
    bind_module_sources(&mut graph, &sim).unwrap();
    let (recorder, seen) = LenRecorder::new();
    graph.add_plugin("recorder", Box::new(recorder)).unwrap();
    graph
        .connect("sim0/trace0", "out", "recorder", "in")
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let handle = run::spawn(
        vec![Box::new(sim)],
        graph,
        RunOptions::new("irq-test", dir.path()),
    )
    .unwrap();
    let status = handle.status();

    wait_until(Duration::from_secs(5), || {
        status.borrow().state == RunState::Running
    });
    assert_eq!(status.borrow().discipline, Some(TriggerDiscipline::Interrupt));

    let triggers = handle.trigger_sender();
    for _ in 0..3 {
        triggers
            .send(TriggerSignal {
                module: "sim0".into(),
                channel: "trigger".into(),
            })
            .unwrap();
    }

    wait_until(Duration::from_secs(5), || handle.counters().events() >= 3);
    handle.stop();
    let outcome = handle.join().unwrap();

    assert_eq!(outcome.events, 3);
    // The interrupt discipline never polls.
    assert_eq!(outcome.polls, 0);
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[test]
fn stop_is_idempotent_and_never_deadlocks() {
    let sim = SimDigitizer::new(
        "sim0",
        SimConfig {
            ready_interval: u32::MAX,
            ..SimConfig::default()
        },
    );
    let mut graph = Graph::new();
    bind_module_sources(&mut graph, &sim).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let handle = run::spawn(
        vec![Box::new(sim)],
        graph,
        RunOptions::new("stop-test", dir.path()),
    )
    .unwrap();

    handle.stop();
    handle.stop();
    let outcome = handle.join().unwrap();
    assert_eq!(outcome.events, 0);
}

#[test]
fn mixed_trigger_kinds_downgrade_to_poll() {
    let module = QuietModule {
        channels: vec![
            Channel::new("irq", ChannelKind::Trigger(TriggerMode::Interrupt)),
            Channel::new("soft", ChannelKind::Trigger(TriggerMode::Poll)),
            Channel::new("trace", ChannelKind::Trace),
        ],
    };

    let dir = tempfile::tempdir().unwrap();
    let handle = run::spawn(
        vec![Box::new(module)],
        Graph::new(),
        RunOptions::new("mixed-test", dir.path()),
    )
    .unwrap();
    let status = handle.status();

    wait_until(Duration::from_secs(5), || {
        status.borrow().state == RunState::Running
    });
    assert_eq!(status.borrow().discipline, Some(TriggerDiscipline::Poll));

    handle.stop();
    let outcome = handle.join().unwrap();
    assert_eq!(outcome.events, 0);
}

#[test]
fn run_returns_graph_and_modules_to_the_caller() {
    let sim = SimDigitizer::new("sim0", SimConfig::default());
    let mut graph = Graph::new();
    bind_module_sources(&mut graph, &sim).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let handle = run::spawn(
        vec![Box::new(sim)],
        graph,
        RunOptions::new("handback", dir.path()),
    )
    .unwrap();
    handle.stop();
    let outcome = handle.join().unwrap();

    assert_eq!(outcome.modules.len(), 1);
    assert_eq!(outcome.modules[0].name(), "sim0");
    assert!(outcome.graph.contains("sim0/trace0"));
}
