use lockscope::{
    DeadlockInfo, DurationRange, Operation, ResourceId, RunningSimulation, ScriptedWorkload,
    SimConfig, Simulation, SimulationReport, Workload,
};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::time::Duration;

#[allow(dead_code)]
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);
#[allow(dead_code)]
pub const SNAPSHOT_INTERVAL_MS: u64 = 50;

pub struct SimulationHarness {
    pub rx: mpsc::Receiver<DeadlockInfo>,
    pub detected: Arc<StdMutex<bool>>,
    pub running: RunningSimulation,
}

impl SimulationHarness {
    /// Join every simulation thread and return the report
    #[allow(dead_code)]
    pub fn finish(self) -> SimulationReport {
        self.running.wait().expect("Simulation threads should join")
    }
}

/// Parameters with millisecond-scale durations so tests stay fast
#[allow(dead_code)]
pub fn fast_config(clients: usize, resources: usize) -> SimConfig {
    SimConfig {
        clients,
        resources,
        read_duration: DurationRange::millis(1, 5),
        write_duration: DurationRange::millis(2, 10),
        deadlock_window: DurationRange::millis(1, 10),
        cooldown: DurationRange::millis(1, 5),
        snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
        seed: Some(7),
        ..SimConfig::default()
    }
}

/// One scripted single-write client per entry, each pausing `window` between locks
#[allow(dead_code)]
pub fn scripted_writes(scripts: &[&[ResourceId]], window: Duration) -> Vec<Box<dyn Workload>> {
    scripts
        .iter()
        .map(|targets| {
            Box::new(
                ScriptedWorkload::new(vec![Operation::Write(targets.to_vec())])
                    .with_window(window)
                    .with_hold(Duration::from_millis(50)),
            ) as Box<dyn Workload>
        })
        .collect()
}

pub fn start_simulation(simulation: Simulation) -> SimulationHarness {
    let (tx, rx) = mpsc::channel::<DeadlockInfo>();
    let detected = Arc::new(StdMutex::new(false));
    let flag = Arc::clone(&detected);

    let running = simulation
        .callback(move |info| {
            *flag.lock().unwrap() = true;
            let _ = tx.send(info);
        })
        .start()
        .expect("Failed to start simulation");

    SimulationHarness {
        rx,
        detected,
        running,
    }
}

#[allow(dead_code)]
pub fn expect_deadlock(h: &SimulationHarness, timeout: Duration) -> DeadlockInfo {
    match h.rx.recv_timeout(timeout) {
        Ok(info) => {
            assert!(*h.detected.lock().unwrap(), "Deadlock flag should be set");
            info
        }
        Err(_) => panic!("No deadlock detected within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_deadlock(h: &SimulationHarness, timeout: Duration) {
    assert!(
        h.rx.recv_timeout(timeout).is_err(),
        "Unexpected deadlock detected"
    );
    assert!(
        !*h.detected.lock().unwrap(),
        "Deadlock flag should not be set"
    );
}
