//! Error types for the lock protocol and snapshot analysis

use crate::core::types::{ClientId, ResourceId};
use thiserror::Error;

/// Misuse of the lock protocol by a caller
///
/// These are contract violations rather than runtime conditions: they abort the
/// offending operation only, the rest of the simulation carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    /// Write locks are not reentrant
    #[error("client {client} already holds resource {resource}")]
    AlreadyHeld {
        client: ClientId,
        resource: ResourceId,
    },

    #[error("client {client} does not own resource {resource} (owner: {owner:?})")]
    NotOwner {
        client: ClientId,
        resource: ResourceId,
        owner: Option<ClientId>,
    },

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("unknown client {0}")]
    UnknownClient(ClientId),
}

/// A coherence violation found in a captured snapshot
///
/// Snapshots taken by the lock manager never contain these; they show up only
/// for hand-built snapshots. The detector drops the affected edge and keeps
/// going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotAnomaly {
    #[error("inconsistent snapshot: resource {resource} claimed by clients {first} and {second}")]
    DoubleOwnership {
        resource: ResourceId,
        first: ClientId,
        second: ClientId,
    },

    #[error("inconsistent snapshot: client {client} waits for resource {resource} it already owns")]
    SelfWait {
        client: ClientId,
        resource: ResourceId,
    },

    #[error("inconsistent snapshot: client {client} waits for resource {resource} which has no owner")]
    OrphanWait {
        client: ClientId,
        resource: ResourceId,
    },
}
