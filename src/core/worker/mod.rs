//! Simulated clients
//!
//! A [`ClientWorker`] is one transaction actor. Each loop iteration takes the
//! next operation from its [`Workload`] and runs it against the lock manager:
//! reads are lock-free, writes take exclusive locks in the listed order, hold
//! them for the write duration and release them in reverse order.

pub mod workload;

pub use workload::{Phase, RandomWorkload, ScriptedWorkload, Workload};

use crate::core::error::LockError;
use crate::core::lock_manager::{Acquisition, LockManager};
use crate::core::logger::EventSink;
use crate::core::shutdown::ShutdownSignal;
use crate::core::types::{ClientId, Events, Operation, ResourceId};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// What a worker got done before it stopped
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub reads: u64,
    /// Reads cut short because shutdown fired
    pub reads_interrupted: u64,
    pub writes_committed: u64,
    /// Writes abandoned because shutdown fired
    pub writes_interrupted: u64,
    /// Operations rejected by the lock manager
    pub protocol_errors: u64,
}

/// One simulated client
pub struct ClientWorker {
    id: ClientId,
    manager: Arc<LockManager>,
    workload: Box<dyn Workload>,
    shutdown: ShutdownSignal,
    events: EventSink,
    stats: WorkerStats,
}

impl ClientWorker {
    /// Register a new client with `manager`
    pub fn new(
        manager: Arc<LockManager>,
        workload: Box<dyn Workload>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let id = manager.register_client();
        Self::with_id(id, manager, workload, shutdown)
    }

    /// Drive an already registered client
    pub fn with_id(
        id: ClientId,
        manager: Arc<LockManager>,
        workload: Box<dyn Workload>,
        shutdown: ShutdownSignal,
    ) -> Self {
        ClientWorker {
            id,
            manager,
            workload,
            shutdown,
            events: EventSink::disabled(),
            stats: WorkerStats::default(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Run operations until the workload is exhausted or shutdown fires
    pub fn run(mut self) -> WorkerStats {
        let id = self.id;
        self.events.client(id, Events::Spawn);
        info!(client = id, "connection established, starting workload");

        while !self.shutdown.is_triggered() {
            let Some(operation) = self.workload.next_operation() else {
                break;
            };

            let result = match &operation {
                Operation::Read(resource) => self.perform_read(*resource),
                Operation::Write(targets) => self.perform_write(targets),
            };
            if let Err(e) = result {
                warn!(client = id, ?operation, "operation rejected: {e}");
                self.stats.protocol_errors += 1;
            }

            let cooldown = self.workload.duration(Phase::Cooldown);
            if self.shutdown.sleep(cooldown) {
                break;
            }
        }

        self.events.client(id, Events::Exit);
        info!(client = id, stats = ?self.stats, "connection closed");
        self.stats
    }

    /// Run on a dedicated thread named after the client
    pub fn spawn(self) -> Result<JoinHandle<WorkerStats>> {
        thread::Builder::new()
            .name(format!("client-{}", self.id))
            .spawn(move || self.run())
            .context("Failed to spawn client thread")
    }

    fn perform_read(&mut self, resource: ResourceId) -> Result<(), LockError> {
        self.manager.acquire_read(resource)?;
        self.events.interaction(self.id, resource, Events::Read);

        let duration = self.workload.duration(Phase::Read);
        info!(
            client = self.id,
            "performing READ on resource {resource} for {:.2}s",
            duration.as_secs_f64()
        );
        if self.shutdown.sleep(duration) {
            self.stats.reads_interrupted += 1;
        } else {
            self.stats.reads += 1;
        }
        Ok(())
    }

    fn perform_write(&mut self, targets: &[ResourceId]) -> Result<(), LockError> {
        info!(client = self.id, "starting WRITE transaction on {targets:?}");

        let mut held = Vec::with_capacity(targets.len());
        let result = self.acquire_all(targets, &mut held);

        let interrupted = match result {
            Ok(true) => {
                let duration = self.workload.duration(Phase::Write);
                info!(
                    client = self.id,
                    "all locks acquired, performing WRITE on {targets:?} for {:.2}s",
                    duration.as_secs_f64()
                );
                if self.shutdown.sleep(duration) {
                    true
                } else {
                    self.stats.writes_committed += 1;
                    false
                }
            }
            Ok(false) => true,
            Err(_) => false,
        };

        if interrupted {
            self.stats.writes_interrupted += 1;
            self.abandon();
        } else {
            self.release_held(&held);
        }

        result.map(|_| ())
    }

    /// Release `held` in reverse acquisition order
    fn release_held(&mut self, held: &[ResourceId]) {
        if !held.is_empty() {
            info!(
                client = self.id,
                "finishing transaction, releasing {held:?}"
            );
        }
        for &resource in held.iter().rev() {
            match self.manager.release(resource, self.id) {
                Ok(()) => self.events.interaction(self.id, resource, Events::Released),
                Err(e) => {
                    warn!(client = self.id, "release failed: {e}");
                    self.stats.protocol_errors += 1;
                }
            }
        }
    }

    /// Give back every lock and withdraw any wait after shutdown interrupted a
    /// transaction
    fn abandon(&mut self) {
        match self.manager.release_all(self.id) {
            Ok(released) => {
                if !released.is_empty() {
                    info!(
                        client = self.id,
                        "transaction interrupted, released {released:?}"
                    );
                }
                for resource in released {
                    self.events.interaction(self.id, resource, Events::Released);
                }
            }
            Err(e) => {
                warn!(client = self.id, "release on shutdown failed: {e}");
                self.stats.protocol_errors += 1;
            }
        }
    }

    /// Lock `targets` in order, pausing for the deadlock window after the first
    ///
    /// # Returns
    /// `Ok(false)` if shutdown interrupted the transaction. Every lock taken is
    /// pushed to `held` whatever the outcome.
    fn acquire_all(
        &mut self,
        targets: &[ResourceId],
        held: &mut Vec<ResourceId>,
    ) -> Result<bool, LockError> {
        for (i, &resource) in targets.iter().enumerate() {
            if self.shutdown.is_triggered() {
                return Ok(false);
            }

            info!(client = self.id, "attempting WRITE lock on resource {resource}");
            self.events.interaction(self.id, resource, Events::Attempt);

            let id = self.id;
            let events = &self.events;
            let acquisition = self
                .manager
                .acquire_write_blocking_with(resource, id, |owner| {
                    info!(
                        client = id,
                        "resource {resource} is held by client {owner}, waiting"
                    );
                    events.interaction(id, resource, Events::Blocked);
                })?;
            if acquisition == Acquisition::Interrupted {
                return Ok(false);
            }

            held.push(resource);
            self.events.interaction(self.id, resource, Events::Acquired);
            info!(client = self.id, "ACQUIRED write lock on resource {resource}");

            if i == 0 && targets.len() > 1 {
                let window = self.workload.duration(Phase::Window);
                if self.shutdown.sleep(window) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
