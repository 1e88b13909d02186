// Core types
pub mod types;
pub use types::*;

pub mod config;
pub mod error;

// Logging functionality
pub mod logger;

// Graph implementation
pub mod graph;

// Deadlock detector
pub mod detector;

pub mod lock_manager;
pub mod shutdown;
pub mod snapshot;
pub mod worker;

use crate::core::config::SimConfig;
use crate::core::detector::{DeadlockCallback, DeadlockDetector};
use crate::core::lock_manager::LockManager;
use crate::core::logger::{EventLogger, EventSink};
use crate::core::shutdown::ShutdownSignal;
use crate::core::snapshot::Snapshotter;
use crate::core::worker::{ClientWorker, RandomWorkload, WorkerStats, Workload};
use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// How often `wait` checks whether every client has run out of work
const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// Simulation builder
///
/// # Example
///
/// ```no_run
/// use lockscope::{SimConfig, Simulation};
///
/// let report = Simulation::new(SimConfig::default())
///     .with_log("logs/lockscope_{timestamp}.log")
///     .callback(|info| println!("deadlock: {}", info.cycle_path()))
///     .start()?
///     .wait()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Simulation {
    config: SimConfig,
    log_path: Option<PathBuf>,
    callback: Option<DeadlockCallback>,
    workloads: Option<Vec<Box<dyn Workload>>>,
    shutdown: ShutdownSignal,
}

impl Simulation {
    /// Create a simulation with the given parameters
    ///
    /// By default:
    /// - The event log is disabled
    /// - No callback is registered; a deadlock is only logged
    /// - Each client draws a random workload from the configuration
    pub fn new(config: SimConfig) -> Self {
        Simulation {
            config,
            log_path: None,
            callback: None,
            workloads: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Activate the event log and set the path for the log file
    ///
    /// If the path contains "{timestamp}", it will be replaced with the
    /// current timestamp.
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Set a callback to be invoked when a deadlock is detected
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Replace the random workloads with one explicit workload per client
    ///
    /// The number of clients becomes the number of workloads.
    pub fn with_workloads(mut self, workloads: Vec<Box<dyn Workload>>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Handle to the shutdown signal, usable before `start`
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Spawn the clients and the snapshotter
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the event log cannot
    /// be opened or a thread cannot be spawned.
    pub fn start(self) -> Result<RunningSimulation> {
        self.config.validate().context("Invalid simulation config")?;

        let events = match &self.log_path {
            Some(path) => EventSink::new(
                EventLogger::with_file(path).context("Failed to initialize event log")?,
            ),
            None => EventSink::disabled(),
        };

        let shutdown = self.shutdown;
        let manager = LockManager::new(self.config.resources, shutdown.clone());

        let mut detector = DeadlockDetector::new(shutdown.clone()).with_events(events.clone());
        if let Some(callback) = self.callback {
            detector = detector.with_callback(move |info| callback(info));
        }
        let detector = Arc::new(detector);

        let workloads: Vec<Box<dyn Workload>> = match self.workloads {
            Some(workloads) => workloads,
            None => (1..=self.config.clients)
                .map(|client| {
                    Box::new(RandomWorkload::new(&self.config, client)) as Box<dyn Workload>
                })
                .collect(),
        };

        info!(
            clients = workloads.len(),
            resources = self.config.resources,
            event_log = events.is_enabled(),
            snapshot_interval_ms = self.config.snapshot_interval_ms,
            "starting simulation"
        );

        let mut workers = Vec::with_capacity(workloads.len());
        for workload in workloads {
            let worker = ClientWorker::new(Arc::clone(&manager), workload, shutdown.clone())
                .with_events(events.clone());
            let id = worker.id();
            match worker.spawn() {
                Ok(handle) => workers.push((id, handle)),
                Err(e) => {
                    abort_start(&shutdown, workers);
                    return Err(e);
                }
            }
        }

        let snapshotter = match Snapshotter::new(
            Arc::clone(&manager),
            Arc::clone(&detector),
            self.config.snapshot_interval(),
            shutdown.clone(),
        )
        .with_events(events.clone())
        .spawn()
        {
            Ok(handle) => handle,
            Err(e) => {
                abort_start(&shutdown, workers);
                return Err(e);
            }
        };

        Ok(RunningSimulation {
            shutdown,
            manager,
            detector,
            workers,
            snapshotter,
            events,
        })
    }
}

/// Stop and join the clients spawned before `start` failed
fn abort_start(shutdown: &ShutdownSignal, workers: Vec<(ClientId, JoinHandle<WorkerStats>)>) {
    shutdown.trigger();
    for (id, handle) in workers {
        if handle.join().is_err() {
            warn!(client = id, "client thread panicked during aborted start");
        }
    }
}

/// Outcome of a finished simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// The deadlock that ended the run, if one was found
    pub deadlock: Option<DeadlockInfo>,
    /// Per-client totals, ascending by client id
    pub workers: Vec<(ClientId, WorkerStats)>,
}

/// Handle to a simulation whose threads are running
pub struct RunningSimulation {
    shutdown: ShutdownSignal,
    manager: Arc<LockManager>,
    detector: Arc<DeadlockDetector>,
    workers: Vec<(ClientId, JoinHandle<WorkerStats>)>,
    snapshotter: JoinHandle<()>,
    events: EventSink,
}

impl RunningSimulation {
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    /// Request an orderly stop
    ///
    /// # Returns
    /// `false` if shutdown had already been requested
    pub fn shutdown(&self) -> bool {
        self.shutdown.trigger()
    }

    /// Block until shutdown, then join every thread
    ///
    /// Shutdown fires on a detected deadlock, on request, or once every client
    /// has exhausted its workload.
    ///
    /// # Errors
    /// Returns an error if a simulation thread panicked.
    pub fn wait(self) -> Result<SimulationReport> {
        while !self.shutdown.sleep(COMPLETION_POLL) {
            if self.workers.iter().all(|(_, handle)| handle.is_finished()) {
                info!("all clients finished their workloads");
                self.shutdown.trigger();
            }
        }
        info!("shutdown signal observed, stopping threads");

        self.snapshotter
            .join()
            .map_err(|_| anyhow!("snapshotter thread panicked"))?;

        let mut workers = Vec::with_capacity(self.workers.len());
        for (id, handle) in self.workers {
            let stats = handle
                .join()
                .map_err(|_| anyhow!("client {id} thread panicked"))?;
            workers.push((id, stats));
        }

        if let Err(e) = self.events.flush() {
            warn!("failed to flush event log: {e:#}");
        }

        info!("simulation finished");
        Ok(SimulationReport {
            deadlock: self.detector.report(),
            workers,
        })
    }
}
