use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lockscope::{
    BANNER, Operation, ResourcePolicy, ScriptedWorkload, ShutdownSignal, SimConfig, Simulation,
    SimulationReport, Workload,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockscope - Deadlock Formation and Snapshot-Based Detection Simulator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run clients with a random read/write workload until a deadlock forms
    Run(RunArgs),
    /// Stage the two-client deadlock: client 1 locks A then B, client 2 locks B then A
    Abba(AbbaArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    clients: Option<usize>,
    #[arg(long)]
    resources: Option<usize>,
    /// Probability that an operation is a WRITE
    #[arg(long)]
    write_probability: Option<f64>,
    /// Probability that a WRITE locks two resources
    #[arg(long)]
    multi_resource_probability: Option<f64>,
    #[arg(long)]
    snapshot_interval_ms: Option<u64>,
    /// Give each client a private resource (no contention)
    #[arg(long)]
    partitioned: bool,
    /// Seed for reproducible workloads
    #[arg(long)]
    seed: Option<u64>,
    /// Path to the JSON-lines event log; "{timestamp}" is expanded
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Args)]
struct AbbaArgs {
    /// Pause between the first and the second lock
    #[arg(long, default_value_t = 200)]
    window_ms: u64,
    #[arg(long, default_value_t = 500)]
    snapshot_interval_ms: u64,
    #[arg(long)]
    log: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> Result<(SimConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_json_file(path)?,
            None => SimConfig::default(),
        };
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(resources) = self.resources {
            config.resources = resources;
        }
        if let Some(p) = self.write_probability {
            config.write_probability = p;
        }
        if let Some(p) = self.multi_resource_probability {
            config.multi_resource_probability = p;
        }
        if let Some(ms) = self.snapshot_interval_ms {
            config.snapshot_interval_ms = ms;
        }
        if self.partitioned {
            config.resource_policy = ResourcePolicy::Partitioned;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok((config, self.log))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .init();
}

/// Trigger `shutdown` on Ctrl-C or SIGTERM
fn install_signal_handler(shutdown: ShutdownSignal) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            runtime.block_on(async {
                let ctrl_c = tokio::signal::ctrl_c();

                #[cfg(unix)]
                {
                    use tokio::signal::unix::{SignalKind, signal};
                    match signal(SignalKind::terminate()) {
                        Ok(mut terminate) => {
                            tokio::select! {
                                res = ctrl_c => {
                                    if let Err(e) = res {
                                        error!("failed to listen for Ctrl+C: {e}");
                                        return;
                                    }
                                }
                                _ = terminate.recv() => {}
                            }
                        }
                        Err(e) => {
                            warn!("failed to install SIGTERM handler: {e}");
                            if let Err(e) = ctrl_c.await {
                                error!("failed to listen for Ctrl+C: {e}");
                                return;
                            }
                        }
                    }
                }

                #[cfg(not(unix))]
                {
                    if let Err(e) = ctrl_c.await {
                        error!("failed to listen for Ctrl+C: {e}");
                        return;
                    }
                }

                warn!("interrupt received, shutting down");
                shutdown.trigger();
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn run(simulation: Simulation) -> Result<SimulationReport> {
    install_signal_handler(simulation.shutdown_signal())?;
    let report = simulation.start()?.wait()?;

    match &report.deadlock {
        Some(info) => {
            println!(
                "Deadlock detected: {}",
                serde_json::to_string_pretty(info).unwrap_or_else(|_| format!("{info:?}"))
            );
        }
        None => info!("stopped without a deadlock"),
    }
    for (client, stats) in &report.workers {
        info!(client, ?stats, "client summary");
    }
    Ok(report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    println!("{BANNER}");

    let simulation = match cli.command {
        Command::Run(args) => {
            let (config, log) = args.into_config()?;
            let simulation = Simulation::new(config);
            match log {
                Some(path) => simulation.with_log(path),
                None => simulation,
            }
        }
        Command::Abba(args) => {
            let config = SimConfig {
                clients: 2,
                resources: 2,
                snapshot_interval_ms: args.snapshot_interval_ms,
                ..SimConfig::default()
            };
            let window = Duration::from_millis(args.window_ms);
            let hold = Duration::from_secs(1);
            let workloads: Vec<Box<dyn Workload>> = vec![
                Box::new(
                    ScriptedWorkload::new(vec![Operation::Write(vec![0, 1])])
                        .with_window(window)
                        .with_hold(hold),
                ),
                Box::new(
                    ScriptedWorkload::new(vec![Operation::Write(vec![1, 0])])
                        .with_window(window)
                        .with_hold(hold),
                ),
            ];
            let simulation = Simulation::new(config).with_workloads(workloads);
            match args.log {
                Some(path) => simulation.with_log(path),
                None => simulation,
            }
        }
    };

    run(simulation)?;
    Ok(())
}
