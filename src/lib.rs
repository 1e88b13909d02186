//! # Lockscope
//!
//! A simulator of deadlock formation and snapshot-based deadlock detection.
//!
//! Simulated clients contend for exclusive write locks on shared resources.
//! A monitoring thread periodically captures a consistent global snapshot of
//! who holds what and who waits for what, builds a wait-for graph from it and
//! searches that graph for cycles. The first cycle found is reported and the
//! whole simulation shuts down.
//!
//! ## Features
//!
//! - Lock manager with exclusive, non-reentrant write locks and lock-free reads
//! - Consistent global snapshots taken while clients keep running
//! - Wait-for graph cycle detection with ordered cycle reports
//! - One-shot broadcast shutdown honoured by every blocked thread
//! - Optional JSON-lines event log

mod core;
pub use core::{
    RunningSimulation, Simulation, SimulationReport,
    config::{DurationRange, ResourcePolicy, SimConfig},
    detector::DeadlockDetector,
    error::{LockError, SnapshotAnomaly},
    graph::WaitForGraph,
    lock_manager::{Acquisition, LockManager, WaitOutcome, WriteOutcome},
    logger::{EventLogger, EventSink, LogEntry},
    shutdown::ShutdownSignal,
    snapshot::{ClientSnapshot, GlobalSnapshot, Snapshotter},
    types::{ClientId, ClientStatus, DeadlockInfo, Events, Operation, Resource, ResourceId, SnapshotId},
    worker::{ClientWorker, Phase, RandomWorkload, ScriptedWorkload, WorkerStats, Workload},
};

pub const BANNER: &str = r#"
   _            _
  | | ___   ___| | _____  ___ ___  _ __   ___
  | |/ _ \ / __| |/ / __|/ __/ _ \| '_ \ / _ \
  | | (_) | (__|   <\__ \ (_| (_) | |_) |  __/
  |_|\___/ \___|_|\_\___/\___\___/| .__/ \___|
                                  |_|
"#;
