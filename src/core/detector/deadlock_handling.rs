use crate::core::detector::DeadlockDetector;
use crate::core::snapshot::GlobalSnapshot;
use crate::core::types::{ClientId, DeadlockInfo};
use chrono::Utc;
use tracing::{debug, error};

impl DeadlockDetector {
    /// Package a cycle together with what each member is waiting for
    ///
    /// Only waits of clients in the cycle are included, read from the same
    /// snapshot the cycle was found in.
    pub fn extract_deadlock_info(
        &self,
        snapshot: &GlobalSnapshot,
        cycle: Vec<ClientId>,
    ) -> DeadlockInfo {
        let client_waiting_for_resources = cycle
            .iter()
            .filter_map(|&c| {
                snapshot
                    .client(c)
                    .and_then(|state| state.waiting_for)
                    .map(|r| (c, r))
            })
            .collect();

        DeadlockInfo {
            client_cycle: cycle,
            client_waiting_for_resources,
            snapshot_id: snapshot.id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Report a deadlock and shut the simulation down
    ///
    /// Only the caller that wins the shutdown transition reports; everyone
    /// else returns without side effects.
    ///
    /// # Returns
    /// `true` if this call performed the report
    pub fn handle_detected_deadlock(&self, info: &DeadlockInfo) -> bool {
        // Hold the slot while triggering so report() never lags the signal
        let mut slot = self.report.lock();
        if !self.shutdown.trigger() {
            debug!(
                snapshot = info.snapshot_id,
                "deadlock already reported, ignoring"
            );
            return false;
        }
        *slot = Some(info.clone());
        drop(slot);

        error!("!!! DEADLOCK DETECTED !!!");
        error!(
            snapshot = info.snapshot_id,
            "dependency cycle found: {}",
            info.cycle_path()
        );
        for (client, resource) in &info.client_waiting_for_resources {
            error!("client {client} is blocked on resource {resource}");
        }
        error!("initiating graceful shutdown");

        self.events.deadlock(info);
        if let Some(callback) = &self.callback {
            callback(info.clone());
        }
        true
    }
}
