// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Configuration management for testagent.
//!
//! All sections deserialize from TOML and fall back to defaults for any
//! missing key, so a minimal file only needs the `[cluster]` endpoints.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest chaos level. Level 0 disables chaos entirely.
pub const MAX_CHAOS_LEVEL: u8 = 4;

/// Main configuration for a testagent run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Chaos injection configuration.
    pub chaos: ChaosConfig,
    /// Workload configuration.
    pub workload: WorkloadConfig,
    /// Cluster under test.
    pub cluster: ClusterConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        self.chaos.validate()?;
        self.workload.validate()?;
        if !self.workload.plans.is_empty() && self.cluster.coordinators.is_empty() {
            return Err(Error::Config(
                "workloads are enabled but no coordinator endpoint is configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose a Prometheus endpoint.
    pub enabled: bool,
    /// Bind address for the metrics endpoint.
    pub bind: String,
    /// Port for the metrics endpoint.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, bind: "0.0.0.0".to_string(), port: 9464 }
    }
}

/// Configuration for the chaos fault injector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Chaos level, 0 (off) through 4 (everything including reboots and membership changes).
    pub level: u8,
    /// Pause between two chaos actions in milliseconds.
    pub action_interval_ms: u64,
    /// Lower bound of a traffic-partition hold in milliseconds.
    pub hold_min_ms: u64,
    /// Upper bound of a traffic-partition hold in milliseconds.
    pub hold_max_ms: u64,
    /// Ready agents required before an agent-targeting action may run.
    pub min_ready_agents: usize,
    /// Ready coordinators required before a coordinator-targeting action may run.
    pub min_ready_coordinators: usize,
    /// Down dbservers tolerated before a dbserver-targeting action may run.
    pub max_down_dbservers: usize,
    /// Machine ceiling for the add-machine action.
    pub max_machines: usize,
    /// Timeout for a single readiness probe in milliseconds.
    pub probe_timeout_ms: u64,
    /// Number of events retained by the event log.
    pub event_capacity: usize,
    /// Seed for action, machine and hold selection. Random when unset.
    pub seed: Option<u64>,
    /// Selection weights by action name. Unlisted actions weigh 1.
    pub weights: BTreeMap<String, u32>,
    /// Action names or ids disabled after the level has been applied.
    pub disabled: Vec<String>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            level: MAX_CHAOS_LEVEL,
            action_interval_ms: 30_000,
            hold_min_ms: 5_000,
            hold_max_ms: 65_000,
            min_ready_agents: 3,
            min_ready_coordinators: 2,
            max_down_dbservers: 0,
            max_machines: 10,
            probe_timeout_ms: 5_000,
            event_capacity: 1_000,
            seed: None,
            weights: BTreeMap::new(),
            disabled: Vec::new(),
        }
    }
}

impl ChaosConfig {
    /// Sets the chaos level.
    pub fn level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// Sets the pause between actions.
    pub fn action_interval(mut self, interval: Duration) -> Self {
        self.action_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the traffic-partition hold range.
    pub fn hold_range(mut self, min: Duration, max: Duration) -> Self {
        self.hold_min_ms = min.as_millis() as u64;
        self.hold_max_ms = max.as_millis() as u64;
        self
    }

    /// Sets the RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the machine ceiling for the add-machine action.
    pub fn max_machines(mut self, max: usize) -> Self {
        self.max_machines = max;
        self
    }

    /// Returns the pause between actions as a Duration.
    pub fn action_interval_duration(&self) -> Duration {
        Duration::from_millis(self.action_interval_ms)
    }

    /// Returns the hold lower bound as a Duration.
    pub fn hold_min(&self) -> Duration {
        Duration::from_millis(self.hold_min_ms)
    }

    /// Returns the hold upper bound as a Duration.
    pub fn hold_max(&self) -> Duration {
        Duration::from_millis(self.hold_max_ms)
    }

    /// Returns the probe timeout as a Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validates the chaos section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an out-of-range level or an inverted hold range.
    pub fn validate(&self) -> Result<()> {
        if self.level > MAX_CHAOS_LEVEL {
            return Err(Error::Config(format!(
                "chaos level {} exceeds maximum {}",
                self.level, MAX_CHAOS_LEVEL
            )));
        }
        if self.hold_min_ms > self.hold_max_ms {
            return Err(Error::Config(format!(
                "hold_min_ms ({}) is greater than hold_max_ms ({})",
                self.hold_min_ms, self.hold_max_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Configuration for workload scripts and the resilient operation protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Timeout for a single request attempt in milliseconds.
    pub operation_timeout_ms: u64,
    /// Overall deadline of one logical operation, as a multiple of the attempt timeout.
    pub deadline_multiplier: u32,
    /// First retry backoff in milliseconds. Doubles per retry.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// Low-level transport retries for connection failures.
    pub transport_retries: u32,
    /// Pause between two plan cycles in milliseconds.
    pub step_interval_ms: u64,
    /// Workload plans to run (`doc-col`, `one-shard`, `graph`, `smart-graph`, `enterprise-graph`).
    pub plans: Vec<String>,
    /// Number of shards for created collections.
    pub number_of_shards: u32,
    /// Replication factor for created collections.
    pub replication_factor: u32,
    /// Documents written per plan cycle.
    pub documents_per_cycle: usize,
    /// Status messages retained per workload.
    pub message_capacity: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            deadline_multiplier: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            transport_retries: 3,
            step_interval_ms: 1_000,
            plans: vec!["doc-col".to_string()],
            number_of_shards: 3,
            replication_factor: 2,
            documents_per_cycle: 20,
            message_capacity: 100,
        }
    }
}

impl WorkloadConfig {
    /// Sets the attempt timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the deadline multiplier.
    pub fn deadline_multiplier(mut self, multiplier: u32) -> Self {
        self.deadline_multiplier = multiplier;
        self
    }

    /// Sets the initial and maximum backoff.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Sets the pause between plan cycles.
    pub fn step_interval(mut self, interval: Duration) -> Self {
        self.step_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Returns the attempt timeout as a Duration.
    pub fn operation_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Returns the overall deadline of one logical operation.
    pub fn operation_deadline(&self) -> Duration {
        self.operation_timeout_duration() * self.deadline_multiplier
    }

    /// Returns the initial backoff as a Duration.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Returns the backoff ceiling as a Duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Returns the pause between plan cycles as a Duration.
    pub fn step_interval_duration(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    /// Validates the workload section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the deadline or backoff settings are unusable.
    pub fn validate(&self) -> Result<()> {
        if self.deadline_multiplier == 0 {
            return Err(Error::Config("deadline_multiplier must be at least 1".to_string()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::Config(format!(
                "initial_backoff_ms ({}) is greater than max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// The cluster under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Coordinator endpoints used by workload scripts, e.g. `http://10.0.0.1:8529`.
    pub coordinators: Vec<String>,
    /// Database user for workload requests.
    pub username: String,
    /// Database password for workload requests.
    pub password: String,
    /// Machines available to the chaos injector.
    pub machines: Vec<MachineConfig>,
    /// Shell command that provisions one more machine.
    ///
    /// It prints either the new machine as a JSON object shaped like
    /// `[[cluster.machines]]`, or just its id, in which case the machine
    /// reuses the command templates of the first configured machine.
    pub add_machine_command: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordinators: Vec::new(),
            username: "root".to_string(),
            password: String::new(),
            machines: Vec::new(),
            add_machine_command: None,
        }
    }
}

/// One machine of the cluster under test.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MachineConfig {
    /// Stable machine identity.
    pub id: String,
    /// Whether the machine runs an agent.
    pub has_agent: bool,
    /// Agent endpoint, required when `has_agent` is set.
    pub agent_url: Option<String>,
    /// DBServer endpoint.
    pub dbserver_url: Option<String>,
    /// Coordinator endpoint.
    pub coordinator_url: Option<String>,
    /// Command templates for machine actions.
    pub commands: MachineCommands,
}

/// Shell command templates for machine actions.
///
/// Templates may reference `{id}` and `{role}` (`agent`, `dbserver`, `coordinator`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MachineCommands {
    /// Gracefully restart a server process.
    pub restart: Option<String>,
    /// Kill a server process.
    pub kill: Option<String>,
    /// Reject (actively refuse) traffic to a server.
    pub reject_traffic: Option<String>,
    /// Silently drop traffic to a server.
    pub drop_traffic: Option<String>,
    /// Restore traffic to a server.
    pub accept_traffic: Option<String>,
    /// Reboot the machine.
    pub reboot: Option<String>,
    /// Remove the machine from the cluster.
    pub destroy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chaos.level, MAX_CHAOS_LEVEL);
        assert_eq!(config.chaos.min_ready_agents, 3);
        assert_eq!(config.chaos.min_ready_coordinators, 2);
        assert_eq!(config.workload.deadline_multiplier, 4);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [logging]
            level = "debug"
            format = "json"

            [chaos]
            level = 2
            hold_min_ms = 100
            hold_max_ms = 200
            seed = 7

            [chaos.weights]
            "Kill coordinator" = 5

            [workload]
            operation_timeout_ms = 1000
            plans = ["doc-col", "graph"]

            [cluster]
            coordinators = ["http://127.0.0.1:8529"]

            [[cluster.machines]]
            id = "m1"
            has_agent = true
            agent_url = "http://127.0.0.1:8531"

            [cluster.machines.commands]
            kill = "docker kill {id}-{role}"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.chaos.level, 2);
        assert_eq!(config.chaos.seed, Some(7));
        assert_eq!(config.chaos.weights.get("Kill coordinator"), Some(&5));
        assert_eq!(config.chaos.hold_min(), Duration::from_millis(100));
        assert_eq!(config.workload.operation_deadline(), Duration::from_millis(4000));
        assert_eq!(config.workload.plans, vec!["doc-col", "graph"]);
        assert_eq!(config.cluster.machines.len(), 1);
        assert!(config.cluster.machines[0].has_agent);
        assert_eq!(
            config.cluster.machines[0].commands.kill.as_deref(),
            Some("docker kill {id}-{role}")
        );
        // Unspecified keys keep their defaults
        assert_eq!(config.chaos.max_machines, 10);
        assert_eq!(config.cluster.username, "root");
    }

    #[test]
    fn test_rejects_level_above_maximum() {
        let err = Config::parse("[chaos]\nlevel = 9\n[workload]\nplans = []").unwrap_err();
        assert!(err.to_string().contains("chaos level 9"));
    }

    #[test]
    fn test_rejects_inverted_hold_range() {
        let config = ChaosConfig::default()
            .hold_range(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_workload_without_coordinators() {
        let err = Config::parse("").unwrap_err();
        assert!(err.to_string().contains("no coordinator endpoint"));
    }

    #[test]
    fn test_workload_builder() {
        let config = WorkloadConfig::default()
            .operation_timeout(Duration::from_millis(500))
            .deadline_multiplier(5)
            .backoff(Duration::from_millis(10), Duration::from_millis(80));

        assert_eq!(config.operation_deadline(), Duration::from_millis(2500));
        assert_eq!(config.initial_backoff(), Duration::from_millis(10));
        assert_eq!(config.max_backoff(), Duration::from_millis(80));
        assert!(config.validate().is_ok());

        assert!(config.clone().deadline_multiplier(0).validate().is_err());
    }
}
