use lockscope::{SimConfig, Simulation};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
mod common;
use common::{
    DEADLOCK_TIMEOUT, NO_DEADLOCK_TIMEOUT, SNAPSHOT_INTERVAL_MS, SimulationHarness,
    assert_no_deadlock, scripted_writes, start_simulation,
};

#[test]
fn test_run_ends_when_every_client_finishes() {
    let config = SimConfig {
        clients: 2,
        resources: 2,
        snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
        ..SimConfig::default()
    };
    // Disjoint resources: both scripts run to completion
    let workloads = scripted_writes(&[&[0], &[1]], Duration::ZERO);
    let harness = start_simulation(Simulation::new(config).with_workloads(workloads));
    let shutdown = harness.running.shutdown_signal();

    let (tx, rx) = mpsc::channel();
    let SimulationHarness { rx: deadlocks, running, .. } = harness;
    thread::spawn(move || {
        let _ = tx.send(running.wait().expect("Simulation threads should join"));
    });

    let report = rx
        .recv_timeout(DEADLOCK_TIMEOUT)
        .expect("wait() should return once both clients are done");
    assert!(shutdown.is_triggered());
    assert!(report.deadlock.is_none());
    assert!(deadlocks.recv_timeout(NO_DEADLOCK_TIMEOUT).is_err());
    assert_eq!(report.workers.len(), 2);
    for (client, stats) in &report.workers {
        assert_eq!(stats.writes_committed, 1, "client {client} should commit");
        assert_eq!(stats.writes_interrupted, 0);
    }
}

#[test]
fn test_serialized_writers_on_one_resource_finish() {
    let config = SimConfig {
        clients: 3,
        resources: 1,
        snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
        ..SimConfig::default()
    };
    let workloads = scripted_writes(&[&[0], &[0], &[0]], Duration::ZERO);
    let harness = start_simulation(Simulation::new(config).with_workloads(workloads));

    assert_no_deadlock(&harness, Duration::from_millis(300));
    let report = harness.finish();

    assert!(report.deadlock.is_none());
    let committed: u64 = report.workers.iter().map(|(_, s)| s.writes_committed).sum();
    assert_eq!(committed, 3);
}
