//! Sources of client operations

use crate::core::config::{ResourcePolicy, SimConfig};
use crate::core::types::{ClientId, Operation, ResourceId};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;

/// Timing of one step of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Read,
    Write,
    /// Between the first and second lock of a multi-resource write
    Window,
    Cooldown,
}

/// Supplies a client with operations and step durations
pub trait Workload: Send {
    /// Next operation, or `None` when the workload is exhausted
    fn next_operation(&mut self) -> Option<Operation>;

    /// How long the given phase lasts this time
    fn duration(&mut self, phase: Phase) -> Duration;
}

/// Random mix of reads and writes, as described by a [`SimConfig`]
pub struct RandomWorkload {
    config: SimConfig,
    /// Resources this client may touch
    pool: Vec<ResourceId>,
    rng: StdRng,
}

impl RandomWorkload {
    /// Build the workload for `client`
    ///
    /// With a configured seed each client gets its own reproducible stream;
    /// otherwise the generator is seeded from the OS.
    pub fn new(config: &SimConfig, client: ClientId) -> Self {
        let pool = match config.resource_policy {
            ResourcePolicy::Shared => (0..config.resources).collect(),
            ResourcePolicy::Partitioned => vec![(client.saturating_sub(1)) % config.resources],
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(client as u64)),
            None => StdRng::from_os_rng(),
        };
        RandomWorkload {
            config: config.clone(),
            pool,
            rng,
        }
    }

    pub fn pool(&self) -> &[ResourceId] {
        &self.pool
    }
}

impl Workload for RandomWorkload {
    fn next_operation(&mut self) -> Option<Operation> {
        if self.rng.random_bool(self.config.write_probability) {
            let wanted = if self.pool.len() >= 2
                && self
                    .rng
                    .random_bool(self.config.multi_resource_probability)
            {
                2
            } else {
                1
            };
            let targets: Vec<ResourceId> = self
                .pool
                .choose_multiple(&mut self.rng, wanted)
                .copied()
                .collect();
            Some(Operation::Write(targets))
        } else {
            self.pool.choose(&mut self.rng).map(|&r| Operation::Read(r))
        }
    }

    fn duration(&mut self, phase: Phase) -> Duration {
        let range = match phase {
            Phase::Read => self.config.read_duration,
            Phase::Write => self.config.write_duration,
            Phase::Window => self.config.deadlock_window,
            Phase::Cooldown => self.config.cooldown,
        };
        range.sample(&mut self.rng)
    }
}

/// Fixed list of operations with fixed step durations
///
/// Used to stage deterministic scenarios such as the classic AB/BA deadlock.
pub struct ScriptedWorkload {
    operations: VecDeque<Operation>,
    window: Duration,
    hold: Duration,
}

impl ScriptedWorkload {
    pub fn new(operations: Vec<Operation>) -> Self {
        ScriptedWorkload {
            operations: operations.into(),
            window: Duration::ZERO,
            hold: Duration::ZERO,
        }
    }

    /// Pause between the first and second lock of a write
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Time spent in each read and each write once all locks are held
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

impl Workload for ScriptedWorkload {
    fn next_operation(&mut self) -> Option<Operation> {
        self.operations.pop_front()
    }

    fn duration(&mut self, phase: Phase) -> Duration {
        match phase {
            Phase::Read | Phase::Write => self.hold,
            Phase::Window => self.window,
            Phase::Cooldown => Duration::ZERO,
        }
    }
}
