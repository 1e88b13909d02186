//! Simulation parameters
//!
//! Read once at startup and shared read-only with every component afterwards.

use anyhow::{Context, Result, bail, ensure};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Inclusive range of milliseconds a simulated step may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DurationRange {
    pub const fn millis(min_ms: u64, max_ms: u64) -> Self {
        DurationRange { min_ms, max_ms }
    }

    /// Fixed duration, handy for scripted runs
    pub const fn fixed(ms: u64) -> Self {
        DurationRange {
            min_ms: ms,
            max_ms: ms,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_ms >= self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }
}

/// How resources are handed out to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePolicy {
    /// Every client may touch every resource
    #[default]
    Shared,
    /// Client `n` only ever touches resource `(n - 1) % resources`; no contention
    /// when there are at least as many resources as clients
    Partitioned,
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of concurrent client workers
    pub clients: usize,
    /// Number of lockable resources
    pub resources: usize,
    /// Probability that an operation is a WRITE; READ otherwise
    pub write_probability: f64,
    /// Probability that a WRITE locks two resources instead of one
    pub multi_resource_probability: f64,
    /// Duration of a simulated read
    pub read_duration: DurationRange,
    /// Work done while all write locks are held
    pub write_duration: DurationRange,
    /// Pause between the first and second lock of a two-resource write
    pub deadlock_window: DurationRange,
    /// Pause after each operation
    pub cooldown: DurationRange,
    /// Time between two global snapshots
    pub snapshot_interval_ms: u64,
    pub resource_policy: ResourcePolicy,
    /// Seed for reproducible workloads; each client derives its own stream
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            clients: 10,
            resources: 4,
            write_probability: 0.5,
            multi_resource_probability: 0.4,
            read_duration: DurationRange::millis(2_000, 5_000),
            write_duration: DurationRange::millis(3_000, 6_000),
            deadlock_window: DurationRange::millis(100, 400),
            cooldown: DurationRange::millis(1_000, 2_000),
            snapshot_interval_ms: 5_000,
            resource_policy: ResourcePolicy::Shared,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SimConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// Check that the parameters describe a runnable simulation
    ///
    /// # Errors
    /// Returns an error if counts are zero, probabilities fall outside
    /// `[0, 1]`, a range is inverted, or the snapshot interval is zero.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.clients > 0, "at least one client is required");
        ensure!(self.resources > 0, "at least one resource is required");

        for (name, p) in [
            ("write_probability", self.write_probability),
            ("multi_resource_probability", self.multi_resource_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                bail!("{name} must be within [0, 1], got {p}");
            }
        }

        for (name, range) in [
            ("read_duration", self.read_duration),
            ("write_duration", self.write_duration),
            ("deadlock_window", self.deadlock_window),
            ("cooldown", self.cooldown),
        ] {
            ensure!(
                range.min_ms <= range.max_ms,
                "{name}: min {}ms exceeds max {}ms",
                range.min_ms,
                range.max_ms
            );
        }

        ensure!(
            self.snapshot_interval_ms > 0,
            "snapshot interval must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_probability() {
        let config = SimConfig {
            write_probability: 1.5,
            ..SimConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write_probability"));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = SimConfig {
            cooldown: DurationRange::millis(10, 5),
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_counts() {
        let config = SimConfig {
            clients: 0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = DurationRange::millis(10, 20);
        for _ in 0..100 {
            let d = range.sample(&mut rng);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(
            DurationRange::fixed(3).sample(&mut rng),
            Duration::from_millis(3)
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "clients": 3, "resource_policy": "partitioned", "seed": 9 }}"#
        )
        .unwrap();

        let config = SimConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.clients, 3);
        assert_eq!(config.resources, 4);
        assert_eq!(config.resource_policy, ResourcePolicy::Partitioned);
        assert_eq!(config.seed, Some(9));
    }
}
