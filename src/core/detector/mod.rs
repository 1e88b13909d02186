pub mod deadlock_handling;

use crate::core::graph::WaitForGraph;
use crate::core::logger::EventSink;
use crate::core::shutdown::ShutdownSignal;
use crate::core::snapshot::GlobalSnapshot;
use crate::core::types::DeadlockInfo;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Callback invoked once with the first deadlock found
pub type DeadlockCallback = Arc<dyn Fn(DeadlockInfo) + Send + Sync>;

/// Analyzes global snapshots for wait-for cycles
///
/// The detector is stateless with respect to the lock table: each call to
/// [`DeadlockDetector::analyze`] works only from the snapshot it is given.
///
/// # How it works
///
/// 1. Build a wait-for graph from the snapshot's owned-sets and waits
/// 2. Drop (and warn about) waits that cannot form an edge
/// 3. Search the graph for a cycle, lowest client id first
/// 4. On the first cycle ever found: log it, record it, fire the shutdown
///    signal and invoke the callback
///
/// Step 4 happens at most once per detector, however many snapshots reveal a
/// cycle and however many threads call `analyze` at the same time.
pub struct DeadlockDetector {
    shutdown: ShutdownSignal,
    callback: Option<DeadlockCallback>,
    events: EventSink,
    /// First deadlock reported
    report: Mutex<Option<DeadlockInfo>>,
}

impl DeadlockDetector {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        DeadlockDetector {
            shutdown,
            callback: None,
            events: EventSink::disabled(),
            report: Mutex::new(None),
        }
    }

    /// Set a callback to be invoked when a deadlock is detected
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Record deadlock reports in the event log
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// The deadlock that triggered shutdown, if any
    pub fn report(&self) -> Option<DeadlockInfo> {
        self.report.lock().clone()
    }

    /// Analyze one snapshot
    ///
    /// # Returns
    /// * `Some(info)` - the snapshot contains a deadlock cycle
    /// * `None` - no cycle; the simulation keeps running
    pub fn analyze(&self, snapshot: &GlobalSnapshot) -> Option<DeadlockInfo> {
        info!(snapshot = snapshot.id, "analyzing snapshot for deadlocks");

        let (graph, anomalies) = WaitForGraph::from_snapshot(snapshot);
        for anomaly in &anomalies {
            warn!(snapshot = snapshot.id, "{anomaly}; affected waits dropped");
        }

        if graph.is_empty() {
            info!(snapshot = snapshot.id, "wait-for graph is empty");
        } else {
            for (from, to) in graph.edges() {
                info!(
                    snapshot = snapshot.id,
                    "client {from} is waiting for client {to}"
                );
            }
        }

        let Some(cycle) = graph.find_cycle() else {
            info!(snapshot = snapshot.id, "no deadlock detected");
            return None;
        };

        let info = self.extract_deadlock_info(snapshot, cycle);
        self.handle_detected_deadlock(&info);
        Some(info)
    }
}
