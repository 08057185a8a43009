// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! A cluster view backed by the `[cluster]` configuration.
//!
//! Health probes are plain HTTP requests against each role's endpoint.
//! Mutating actions run the configured shell command templates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use testagent_cluster::{ClusterError, ClusterView, Machine, MachineError, MachineSet, Role};
use testagent_core::{ClusterConfig, MachineCommands, MachineConfig};
use tokio::process::Command;
use tracing::{debug, info};

/// Timeout for one health probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Expands `{id}` and `{role}` in a command template.
fn expand(template: &str, id: &str, role: Option<Role>) -> String {
    let expanded = template.replace("{id}", id);
    match role {
        Some(role) => expanded.replace("{role}", role.name()),
        None => expanded,
    }
}

/// Runs `command` through the shell, returning its trimmed stdout.
async fn shell(command: &str) -> Result<String, String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("cannot run `{}`: {}", command, e))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(format!(
            "`{}` exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// A machine declared in the configuration.
#[derive(Debug)]
pub struct ConfiguredMachine {
    config: MachineConfig,
    client: Client,
    destroyed: AtomicBool,
}

impl ConfiguredMachine {
    /// Creates a machine from its configuration.
    pub fn new(config: MachineConfig, client: Client) -> Self {
        Self { config, client, destroyed: AtomicBool::new(false) }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn endpoint(&self, role: Role) -> Option<&str> {
        match role {
            Role::Agent => self.config.agent_url.as_deref(),
            Role::DbServer => self.config.dbserver_url.as_deref(),
            Role::Coordinator => self.config.coordinator_url.as_deref(),
        }
    }

    async fn run(
        &self,
        action: &str,
        template: Option<&String>,
        role: Option<Role>,
    ) -> Result<(), MachineError> {
        if self.is_destroyed() {
            return Err(MachineError::Gone(self.config.id.clone()));
        }
        let template = template.ok_or_else(|| MachineError::Unsupported {
            machine: self.config.id.clone(),
            action: action.to_string(),
        })?;
        let command = expand(template, &self.config.id, role);
        debug!(machine = %self.config.id, action, command = %command, "Running machine command");
        shell(&command).await.map(|_| ()).map_err(|reason| MachineError::ActionFailed {
            machine: self.config.id.clone(),
            action: action.to_string(),
            reason,
        })
    }

    fn commands(&self) -> &MachineCommands {
        &self.config.commands
    }
}

#[async_trait]
impl Machine for ConfiguredMachine {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn has_agent(&self) -> bool {
        self.config.has_agent
    }

    async fn test_status(&self, role: Role) -> Result<(), MachineError> {
        let base = self.endpoint(role).ok_or_else(|| MachineError::Unsupported {
            machine: self.config.id.clone(),
            action: format!("probe {}", role),
        })?;
        let path = match role {
            Role::Agent => "/_api/version",
            Role::DbServer | Role::Coordinator => "/_admin/server/availability",
        };
        let not_ready = |reason: String| MachineError::NotReady {
            machine: self.config.id.clone(),
            role,
            reason,
        };

        // An unreachable server is down, not an unknown state
        let response = self
            .client
            .get(format!("{}{}", base.trim_end_matches('/'), path))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| not_ready(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(not_ready(format!("status {}", status))),
        }
    }

    async fn kill(&self, role: Role) -> Result<(), MachineError> {
        self.run(&format!("kill {}", role), self.commands().kill.as_ref(), Some(role)).await
    }

    async fn restart(&self, role: Role) -> Result<(), MachineError> {
        self.run(&format!("restart {}", role), self.commands().restart.as_ref(), Some(role)).await
    }

    async fn reject_traffic(&self, role: Role) -> Result<(), MachineError> {
        let template = self.commands().reject_traffic.as_ref();
        self.run(&format!("reject_traffic {}", role), template, Some(role)).await
    }

    async fn drop_traffic(&self, role: Role) -> Result<(), MachineError> {
        let template = self.commands().drop_traffic.as_ref();
        self.run(&format!("drop_traffic {}", role), template, Some(role)).await
    }

    async fn accept_traffic(&self, role: Role) -> Result<(), MachineError> {
        let template = self.commands().accept_traffic.as_ref();
        self.run(&format!("accept_traffic {}", role), template, Some(role)).await
    }

    async fn reboot(&self) -> Result<(), MachineError> {
        self.run("reboot", self.commands().reboot.as_ref(), None).await
    }

    async fn destroy(&self) -> Result<(), MachineError> {
        self.run("destroy", self.commands().destroy.as_ref(), None).await?;
        self.destroyed.store(true, Ordering::Release);
        info!(machine = %self.config.id, "Machine destroyed");
        Ok(())
    }
}

/// The machines declared under `[cluster]`, plus any added at runtime.
#[derive(Debug)]
pub struct StaticCluster {
    client: Client,
    machines: RwLock<Vec<Arc<ConfiguredMachine>>>,
    add_machine_command: Option<String>,
}

impl StaticCluster {
    /// Creates the view from the cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClusterConfig) -> anyhow::Result<Self> {
        let client = Client::builder().connect_timeout(Duration::from_secs(2)).build()?;
        let machines = config
            .machines
            .iter()
            .map(|m| Arc::new(ConfiguredMachine::new(m.clone(), client.clone())))
            .collect();
        Ok(Self {
            client,
            machines: RwLock::new(machines),
            add_machine_command: config.add_machine_command.clone(),
        })
    }

    /// Parses the add-machine command's output.
    fn provisioned(&self, output: &str) -> Result<MachineConfig, ClusterError> {
        if output.starts_with('{') {
            return serde_json::from_str(output).map_err(|e| {
                ClusterError::Unavailable(format!("invalid machine description {}: {}", output, e))
            });
        }
        let id = output.lines().next().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(ClusterError::Unavailable("add machine command printed nothing".into()));
        }
        let commands = self
            .machines
            .read()
            .first()
            .map(|m| m.config.commands.clone())
            .unwrap_or_default();
        Ok(MachineConfig { id: id.to_string(), commands, ..Default::default() })
    }
}

#[async_trait]
impl ClusterView for StaticCluster {
    async fn machines(&self) -> Result<MachineSet, ClusterError> {
        let machines = self.machines.read();
        Ok(machines
            .iter()
            .filter(|m| !m.is_destroyed())
            .map(|m| Arc::clone(m) as Arc<dyn Machine>)
            .collect())
    }

    async fn add_machine(&self) -> Result<Arc<dyn Machine>, ClusterError> {
        let command = self
            .add_machine_command
            .as_deref()
            .ok_or_else(|| ClusterError::Unsupported("no add_machine_command configured".into()))?;
        let output = shell(command).await.map_err(ClusterError::Unavailable)?;
        let config = self.provisioned(&output)?;
        if config.has_agent {
            return Err(ClusterError::Unavailable(format!(
                "provisioned machine {} must not host an agent",
                config.id
            )));
        }

        info!(machine = %config.id, "Machine added");
        let machine = Arc::new(ConfiguredMachine::new(config, self.client.clone()));
        self.machines.write().push(Arc::clone(&machine));
        Ok(machine)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn machine(id: &str, commands: MachineCommands) -> MachineConfig {
        MachineConfig { id: id.to_string(), commands, ..Default::default() }
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(
            expand("docker kill {id}-{role}", "m1", Some(Role::DbServer)),
            "docker kill m1-dbserver"
        );
        assert_eq!(expand("reboot {id}", "m2", None), "reboot m2");
    }

    #[tokio::test]
    async fn test_probe_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_admin/server/availability"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_api/version"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = MachineConfig {
            id: "m1".to_string(),
            has_agent: true,
            agent_url: Some(server.uri()),
            coordinator_url: Some(server.uri()),
            // Nothing listens on port 1
            dbserver_url: Some("http://127.0.0.1:1".to_string()),
            ..Default::default()
        };
        let machine = ConfiguredMachine::new(config, Client::new());

        machine.test_status(Role::Agent).await.unwrap();
        assert!(machine.test_status(Role::Coordinator).await.unwrap_err().is_not_ready());
        assert!(machine.test_status(Role::DbServer).await.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_probe_without_endpoint_is_unsupported() {
        let machine = ConfiguredMachine::new(machine("m1", MachineCommands::default()), Client::new());
        let err = machine.test_status(Role::Coordinator).await.unwrap_err();
        assert!(matches!(err, MachineError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_commands() {
        let commands = MachineCommands {
            kill: Some("test {role} = coordinator".to_string()),
            restart: Some("echo oops >&2; exit 3".to_string()),
            destroy: Some("true".to_string()),
            ..Default::default()
        };
        let machine = ConfiguredMachine::new(machine("m1", commands), Client::new());

        machine.kill(Role::Coordinator).await.unwrap();
        assert!(machine.kill(Role::Agent).await.is_err());

        match machine.restart(Role::DbServer).await.unwrap_err() {
            MachineError::ActionFailed { action, reason, .. } => {
                assert_eq!(action, "restart dbserver");
                assert!(reason.contains("oops"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(matches!(
            machine.reboot().await.unwrap_err(),
            MachineError::Unsupported { .. }
        ));

        machine.destroy().await.unwrap();
        assert!(matches!(machine.kill(Role::Coordinator).await, Err(MachineError::Gone(_))));
    }

    #[tokio::test]
    async fn test_destroyed_machines_leave_the_view() {
        let commands = MachineCommands { destroy: Some("true".to_string()), ..Default::default() };
        let config = ClusterConfig {
            machines: vec![machine("m1", commands.clone()), machine("m2", commands)],
            add_machine_command: Some("echo m3".to_string()),
            ..Default::default()
        };
        let cluster = StaticCluster::new(&config).unwrap();

        let machines = cluster.machines().await.unwrap();
        assert_eq!(machines.len(), 2);
        machines.get("m1").unwrap().destroy().await.unwrap();
        assert_eq!(cluster.machines().await.unwrap().ids(), vec!["m2".to_string()]);

        let added = cluster.add_machine().await.unwrap();
        assert_eq!(added.id(), "m3");
        assert!(!added.has_agent());
        // Inherits the first machine's templates
        added.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_machine_from_json() {
        let config = ClusterConfig {
            add_machine_command: Some(
                r#"echo '{"id": "m9", "coordinator_url": "http://m9:8529"}'"#.to_string(),
            ),
            ..Default::default()
        };
        let cluster = StaticCluster::new(&config).unwrap();
        let added = cluster.add_machine().await.unwrap();
        assert_eq!(added.id(), "m9");
        assert_eq!(cluster.machines().await.unwrap().len(), 1);

        let none = StaticCluster::new(&ClusterConfig::default()).unwrap();
        assert!(matches!(none.add_machine().await, Err(ClusterError::Unsupported(_))));
    }
}
