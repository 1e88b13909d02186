//! Event logging for the simulation
//!
//! Console output goes through `tracing`; this module adds the optional
//! machine-readable event log. Components hold an [`EventSink`], which is a
//! no-op unless a log file was configured.

mod event_logger;

pub use event_logger::{EventLogger, LogEntry};

use crate::core::types::{ClientId, DeadlockInfo, Events, ResourceId, SnapshotId};
use anyhow::Result;
use std::sync::Arc;

/// Cheap, cloneable handle to an optional [`EventLogger`]
#[derive(Clone, Default)]
pub struct EventSink {
    logger: Option<Arc<EventLogger>>,
}

impl EventSink {
    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(logger: EventLogger) -> Self {
        EventSink {
            logger: Some(Arc::new(logger)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.logger.is_some()
    }

    pub fn client(&self, client: ClientId, event: Events) {
        if let Some(logger) = &self.logger {
            logger.log_client_event(client, event);
        }
    }

    pub fn interaction(&self, client: ClientId, resource: ResourceId, event: Events) {
        if let Some(logger) = &self.logger {
            logger.log_interaction_event(client, resource, event);
        }
    }

    pub fn snapshot(&self, snapshot: SnapshotId) {
        if let Some(logger) = &self.logger {
            logger.log_snapshot(snapshot);
        }
    }

    pub fn deadlock(&self, info: &DeadlockInfo) {
        if let Some(logger) = &self.logger {
            logger.log_deadlock(info);
        }
    }

    pub fn flush(&self) -> Result<()> {
        match &self.logger {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }
}
