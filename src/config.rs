//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Worker pool configuration.
///
/// Every delay here is a simulated cost: the engine never measures real CPU or
/// IO, it only paces itself by these values.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Directory that holds per-run scratch files for IO-bound workloads.
    pub scratch_dir: PathBuf,
    /// Size of each scratch file in bytes.
    pub scratch_size: u64,
    /// Bytes touched by one simulated read or write.
    pub io_block_size: usize,
    /// Pause between two units of work.
    pub unit_interval: Duration,
    /// Lower bound of the simulated IO latency.
    pub io_latency_min: Duration,
    /// Upper bound of the simulated IO latency.
    pub io_latency_max: Duration,
    /// Idle delay of a burst workload's rest phase.
    pub rest_delay: Duration,
    /// Cadence of CPU-usage estimate refreshes while running.
    pub cpu_refresh_interval: Duration,
    /// Arithmetic iterations of one CPU unit at the lowest priority.
    pub cpu_base_iterations: u64,
    /// Capacity of the notification broadcast channel.
    pub event_capacity: usize,
    /// How often the console logs aggregate statistics.
    pub stats_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            scratch_size: 64 * 1024,
            io_block_size: 4096,
            unit_interval: Duration::from_millis(100),
            io_latency_min: Duration::from_millis(50),
            io_latency_max: Duration::from_millis(150),
            rest_delay: Duration::from_millis(40),
            cpu_refresh_interval: Duration::from_millis(500),
            cpu_base_iterations: 200_000,
            event_capacity: 1024,
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let config = Self {
            scratch_dir: lookup("WORKER_SIM_SCRATCH_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            scratch_size: number("WORKER_SIM_SCRATCH_SIZE", defaults.scratch_size),
            io_block_size: number("WORKER_SIM_IO_BLOCK_SIZE", defaults.io_block_size as u64)
                as usize,
            unit_interval: millis("WORKER_SIM_UNIT_INTERVAL_MS", defaults.unit_interval),
            io_latency_min: millis("WORKER_SIM_IO_LATENCY_MIN_MS", defaults.io_latency_min),
            io_latency_max: millis("WORKER_SIM_IO_LATENCY_MAX_MS", defaults.io_latency_max),
            rest_delay: millis("WORKER_SIM_REST_DELAY_MS", defaults.rest_delay),
            cpu_refresh_interval: millis("WORKER_SIM_CPU_REFRESH_MS", defaults.cpu_refresh_interval),
            cpu_base_iterations: number("WORKER_SIM_CPU_ITERATIONS", defaults.cpu_base_iterations),
            event_capacity: number("WORKER_SIM_EVENT_CAPACITY", defaults.event_capacity as u64)
                as usize,
            stats_interval: millis("WORKER_SIM_STATS_INTERVAL_MS", defaults.stats_interval),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scratch_size == 0 {
            return Err(invalid("scratch_size", "must be greater than zero"));
        }
        if self.io_block_size == 0 {
            return Err(invalid("io_block_size", "must be greater than zero"));
        }
        if self.io_block_size as u64 > self.scratch_size {
            return Err(invalid(
                "io_block_size",
                format!(
                    "block of {} bytes does not fit a {} byte scratch file",
                    self.io_block_size, self.scratch_size
                ),
            ));
        }
        if self.io_latency_min > self.io_latency_max {
            return Err(invalid(
                "io_latency_min",
                format!(
                    "{:?} exceeds io_latency_max {:?}",
                    self.io_latency_min, self.io_latency_max
                ),
            ));
        }
        if self.cpu_refresh_interval.is_zero() {
            return Err(invalid("cpu_refresh_interval", "must be greater than zero"));
        }
        if self.stats_interval.is_zero() {
            return Err(invalid("stats_interval", "must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cpu_refresh_interval, Duration::from_millis(500));
        assert_eq!(config.io_latency_min, Duration::from_millis(50));
        assert_eq!(config.io_latency_max, Duration::from_millis(150));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("WORKER_SIM_UNIT_INTERVAL_MS", "5"),
            ("WORKER_SIM_SCRATCH_DIR", "/var/tmp/sim"),
            ("WORKER_SIM_CPU_ITERATIONS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.unit_interval, Duration::from_millis(5));
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/sim"));
        assert_eq!(config.cpu_base_iterations, 1000);
        assert_eq!(config.scratch_size, 64 * 1024);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("WORKER_SIM_UNIT_INTERVAL_MS", "soon"),
            ("WORKER_SIM_EVENT_CAPACITY", "-3"),
        ]))
        .unwrap();

        assert_eq!(config.unit_interval, Duration::from_millis(100));
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn inverted_latency_is_rejected() {
        let result = PoolConfig::from_lookup(lookup_from(&[
            ("WORKER_SIM_IO_LATENCY_MIN_MS", "200"),
            ("WORKER_SIM_IO_LATENCY_MAX_MS", "100"),
        ]));

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "io_latency_min"
        ));
    }

    #[test]
    fn block_larger_than_scratch_is_rejected() {
        let config = PoolConfig {
            scratch_size: 1024,
            io_block_size: 4096,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_intervals_and_capacity_are_rejected() {
        for config in [
            PoolConfig {
                stats_interval: Duration::ZERO,
                ..PoolConfig::default()
            },
            PoolConfig {
                cpu_refresh_interval: Duration::ZERO,
                ..PoolConfig::default()
            },
            PoolConfig {
                event_capacity: 0,
                ..PoolConfig::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
