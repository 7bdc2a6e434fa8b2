//! CLI entry point.
//!
//! Wires a simulated digitizer into a plugin graph and runs acquisition
//! until interrupted, a duration elapses or a remote stop arrives. The
//! graph comes from the `[graph]` section of the settings file when
//! present; otherwise a small demonstration graph is built (event builder
//! on both trace channels, amplitude spectrum on the first).
//!
//! ```bash
//! scope-daq --run-dir /data/run42 --duration 10
//! scope-daq --settings scope.toml
//! ```

use anyhow::Result;
use clap::Parser;
use scope_daq::graph::{Graph, GraphSpec, PluginRegistry};
use scope_daq::hardware::sim::{SimConfig, SimDigitizer};
use scope_daq::hardware::DaqModule;
use scope_daq::net::{ControlService, RunCommand, DEFAULT_CONTROL_PORT};
use scope_daq::plugins::{
    bind_module_sources, register_builtins, AmpSpectrumPlugin, EventBuilderPlugin,
};
use scope_daq::run::RunOptions;
use scope_daq::settings::SettingsStore;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scope-daq")]
#[command(about = "Plugin-graph data acquisition front end", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Run name, used in status reports
    #[arg(long, default_value = "run")]
    run_name: String,

    /// Directory receiving the event files
    #[arg(long, default_value = "/tmp")]
    run_dir: PathBuf,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration: Option<f64>,

    /// UDP control/status port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => SettingsStore::load(path)?,
        None => SettingsStore::new(),
    };

    let mut sim = SimDigitizer::new("sim0", SimConfig::default());
    sim.apply_settings(&settings.group("sim0"));

    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry);

    let mut graph = Graph::new();
    bind_module_sources(&mut graph, &sim)?;

    let spec = GraphSpec::from_settings(&settings)?;
    if spec.plugins.is_empty() {
        build_demo_graph(&mut graph)?;
    } else {
        graph.apply_spec(&spec, &registry)?;
    }
    graph.apply_settings(&settings);
    info!(order = ?graph.evaluation_order(), "graph ready");

    let modules: Vec<Box<dyn DaqModule>> = vec![Box::new(sim)];
    let handle = scope_daq::run::spawn(
        modules,
        graph,
        RunOptions::new(&cli.run_name, &cli.run_dir),
    )?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
    let control = ControlService::bind(cli.control_port, handle.status(), cmd_tx).await?;
    info!(port = control.local_port()?, "control service listening");
    tokio::spawn(control.serve());

    let deadline = cli.duration.map(Duration::from_secs_f64);
    let sleep = async move {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping run");
                break;
            }
            _ = &mut sleep => {
                info!("run duration elapsed, stopping");
                break;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(RunCommand::Stop) => {
                    info!("remote stop received");
                    break;
                }
                Some(RunCommand::Start) => warn!("run already active, start ignored"),
                None => break,
            }
        }
    }

    handle.stop();
    let outcome = tokio::task::spawn_blocking(move || handle.join()).await??;
    info!(
        events = outcome.events,
        polls = outcome.polls,
        "acquisition finished"
    );
    Ok(())
}

/// Event builder on both trace channels, amplitude spectrum on the first.
fn build_demo_graph(graph: &mut Graph) -> Result<()> {
    graph.add_plugin(
        "eventbuilder",
        Box::new(EventBuilderPlugin::new("eventbuilder", 2)),
    )?;
    graph.add_plugin("spectrum", Box::new(AmpSpectrumPlugin::new()))?;
    graph.connect("sim0/trace0", "out", "eventbuilder", "in 0")?;
    graph.connect("sim0/trace1", "out", "eventbuilder", "in 1")?;
    graph.connect("sim0/trace0", "out", "spectrum", "in")?;
    Ok(())
}
