use serde::{Deserialize, Serialize};

/// Client identifier type
///
/// Uniquely identifies a simulated client (transaction actor). Ids are handed
/// out by the lock manager starting at 1.
pub type ClientId = usize;

/// Resource identifier type
///
/// Uniquely identifies a lockable resource. Resources are numbered from 0 up to
/// the configured resource count.
pub type ResourceId = usize;

/// Snapshot sequence number
pub type SnapshotId = u64;

/// Represents the type of simulation event that occurred
///
/// These events are recorded by the event logger and mirror the lifecycle of a
/// client operation against the lock manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// A client worker started
    Spawn,
    /// A client worker stopped
    Exit,
    /// Client performed a lock-free read
    Read,
    /// Client is attempting to acquire a write lock
    Attempt,
    /// Client found the resource held and is now suspended
    Blocked,
    /// Client successfully acquired a write lock
    Acquired,
    /// Client released a write lock
    Released,
    /// A global snapshot was captured
    Snapshot,
    /// A deadlock cycle was found
    Deadlock,
}

/// A single lockable unit
///
/// Plain value type: the lock manager keeps the live copy and hands out clones
/// inside snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub owner: Option<ClientId>,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Resource { id, owner: None }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

/// Scheduling state of a client as seen by the lock manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClientStatus {
    /// Free to proceed
    #[default]
    Runnable,
    /// Suspended until the given resource is released
    Waiting(ResourceId),
}

impl ClientStatus {
    pub fn waiting_for(&self) -> Option<ResourceId> {
        match *self {
            ClientStatus::Runnable => None,
            ClientStatus::Waiting(resource) => Some(resource),
        }
    }
}

/// Kind of operation a client performs in one loop iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Lock-free read of a single resource
    Read(ResourceId),
    /// Exclusive write transaction; resources are locked in the listed order
    Write(Vec<ResourceId>),
}

/// Represents the result of a deadlock detection
///
/// Produced by the detector from a single global snapshot and handed to the
/// registered callback exactly once per simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// List of clients involved in the deadlock cycle
    ///
    /// Ordered along the wait-for edges: each client waits for a resource held
    /// by the next one, and the last waits for the first. For example, if
    /// client 1 waits for client 2 and client 2 waits for client 1, the cycle
    /// is [1, 2].
    pub client_cycle: Vec<ClientId>,

    /// For each client in the cycle, the resource it is waiting for
    pub client_waiting_for_resources: Vec<(ClientId, ResourceId)>,

    /// Snapshot the cycle was found in
    pub snapshot_id: SnapshotId,

    /// ISO-8601 formatted timestamp indicating when the deadlock was detected.
    pub timestamp: String,
}

impl DeadlockInfo {
    /// Render the cycle as `1 -> 2 -> 1`
    pub fn cycle_path(&self) -> String {
        let mut parts: Vec<String> = self.client_cycle.iter().map(|c| c.to_string()).collect();
        if let Some(first) = self.client_cycle.first() {
            parts.push(first.to_string());
        }
        parts.join(" -> ")
    }
}
