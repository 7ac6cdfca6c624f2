//! Dispatcher settings.
//!
//! `DispatchSettings` is the serde-loadable part (it nests under `dispatch:`
//! in the YAML config). `DispatchConfig<T>` adds the seed tasks handed to
//! `Manager::start`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrawlrError, Result};
use crate::task::Task;

/// Tunable parameters for one running period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Number of worker slots.
    pub max_workers: usize,
    /// Starting sleep between dispatch cycles.
    pub initial_scan_interval_ms: u64,
    /// Advisory backlog size; scales the batch pressure, never enforced.
    pub queue_capacity_hint: usize,
    /// Total connection cap.
    pub max_connections: usize,
    /// Per-route connection cap. Defaults to half of `max_connections`.
    pub max_connections_per_route: Option<usize>,
    /// Connect and read timeout.
    pub connection_timeout_ms: u64,
    /// Idle time after which a pooled connection is not reused.
    pub connection_validate_interval_ms: u64,
    /// How long `stop` waits for in-flight work before cancelling it.
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            initial_scan_interval_ms: 1000,
            queue_capacity_hint: 1000,
            max_connections: 100,
            max_connections_per_route: None,
            connection_timeout_ms: 10_000,
            connection_validate_interval_ms: 2000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl DispatchSettings {
    /// Effective per-route cap.
    pub fn per_route_cap(&self) -> usize {
        self.max_connections_per_route
            .unwrap_or(self.max_connections / 2)
            .max(1)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn connection_validate_interval(&self) -> Duration {
        Duration::from_millis(self.connection_validate_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(CrawlrError::InvalidConfig("max_workers must be > 0".into()));
        }
        if self.initial_scan_interval_ms == 0 {
            return Err(CrawlrError::InvalidConfig(
                "initial_scan_interval_ms must be > 0".into(),
            ));
        }
        if self.queue_capacity_hint == 0 {
            return Err(CrawlrError::InvalidConfig("queue_capacity_hint must be > 0".into()));
        }
        if self.max_connections == 0 {
            return Err(CrawlrError::InvalidConfig("max_connections must be > 0".into()));
        }
        if let Some(per_route) = self.max_connections_per_route {
            if per_route == 0 || per_route > self.max_connections {
                return Err(CrawlrError::InvalidConfig(format!(
                    "max_connections_per_route must be in 1..={}",
                    self.max_connections
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate settings from YAML. Missing fields take defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a standalone YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// Settings plus the seed tasks for a `Manager::start` call.
#[derive(Debug, Clone)]
pub struct DispatchConfig<T: Task> {
    pub settings: DispatchSettings,
    pub seed_tasks: Vec<T>,
}

impl<T: Task> Default for DispatchConfig<T> {
    fn default() -> Self {
        Self {
            settings: DispatchSettings::default(),
            seed_tasks: Vec::new(),
        }
    }
}

impl<T: Task> DispatchConfig<T> {
    /// Create a config from explicit settings with no seeds.
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            seed_tasks: Vec::new(),
        }
    }

    /// Set the seed tasks.
    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = T>) -> Self {
        self.seed_tasks = seeds.into_iter().collect();
        self
    }

    /// Set the worker slot count.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.settings.max_workers = max_workers;
        self
    }

    /// Set the starting scan interval.
    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.settings.initial_scan_interval_ms = ms;
        self
    }

    /// Set the queue capacity hint.
    pub fn with_capacity_hint(mut self, hint: usize) -> Self {
        self.settings.queue_capacity_hint = hint;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.settings.shutdown_grace_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DispatchSettings::default();
        assert_eq!(settings.max_workers, 10);
        assert_eq!(settings.initial_scan_interval_ms, 1000);
        assert_eq!(settings.shutdown_grace(), Duration::from_secs(10));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_per_route_cap_defaults_to_half() {
        let settings = DispatchSettings {
            max_connections: 40,
            ..Default::default()
        };
        assert_eq!(settings.per_route_cap(), 20);
    }

    #[test]
    fn test_per_route_cap_never_zero() {
        let settings = DispatchSettings {
            max_connections: 1,
            ..Default::default()
        };
        assert_eq!(settings.per_route_cap(), 1);
    }

    #[test]
    fn test_per_route_cap_explicit() {
        let settings = DispatchSettings {
            max_connections: 40,
            max_connections_per_route: Some(35),
            ..Default::default()
        };
        assert_eq!(settings.per_route_cap(), 35);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let settings = DispatchSettings {
            max_workers: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(CrawlrError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_capacity_hint() {
        let settings = DispatchSettings {
            queue_capacity_hint: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_per_route_above_total() {
        let settings = DispatchSettings {
            max_connections: 10,
            max_connections_per_route: Some(11),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let settings: DispatchSettings = serde_yaml::from_str("max_workers: 3\n").unwrap();
        assert_eq!(settings.max_workers, 3);
        assert_eq!(settings.queue_capacity_hint, 1000);
        assert_eq!(settings.max_connections_per_route, None);
    }

    #[test]
    fn test_from_yaml_validates() {
        let err = DispatchSettings::from_yaml("max_workers: 0\n").unwrap_err();
        assert!(matches!(err, CrawlrError::InvalidConfig(_)));

        let err = DispatchSettings::from_yaml("max_workers: [1]\n").unwrap_err();
        assert!(matches!(err, CrawlrError::Yaml(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DispatchSettings::load("/nonexistent/dispatch.yml").unwrap_err();
        assert!(matches!(err, CrawlrError::Io(_)));
    }

    #[test]
    fn test_config_builder() {
        let config = DispatchConfig::default()
            .with_seeds(vec![1u32, 2, 3])
            .with_max_workers(4)
            .with_scan_interval_ms(50)
            .with_capacity_hint(5)
            .with_shutdown_grace_ms(200);

        assert_eq!(config.seed_tasks, vec![1, 2, 3]);
        assert_eq!(config.settings.max_workers, 4);
        assert_eq!(config.settings.initial_scan_interval_ms, 50);
        assert_eq!(config.settings.queue_capacity_hint, 5);
        assert_eq!(config.settings.shutdown_grace_ms, 200);
    }
}
