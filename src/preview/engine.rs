//! Container-engine seam.
//!
//! [`ContainerEngine`] is the narrow trait the pipelines drive; it keeps the
//! lifecycle manager testable without a daemon. [`DockerEngine`] is the real
//! implementation over the Docker/Podman control API via bollard. Engine
//! failures surface as generic `CoreError::Engine`; the core does not
//! distinguish engine-specific error codes beyond success/failure.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, ListContainersOptionsBuilder, ListNetworksOptionsBuilder,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StatsOptionsBuilder, StopContainerOptionsBuilder, WaitContainerOptions,
};
use futures_util::stream::StreamExt;

use crate::errors::CoreError;

use super::profiles::{ContainerSpec, MANAGED_LABEL, NetworkPolicy};

/// Flattened view of a managed container, for introspection and
/// startup reconciliation.
#[derive(Debug, Clone)]
pub struct ContainerSummaryInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: HashMap<String, String>,
    /// First published host port, if any.
    pub host_port: Option<u16>,
}

/// One-shot resource snapshot for a running container.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatsSnapshot {
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_total_usage: u64,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Daemon reachability check.
    async fn ping(&self) -> Result<(), CoreError>;

    /// Create the isolation network if it does not exist yet.
    async fn ensure_network(&self, name: &str) -> Result<(), CoreError>;

    /// Create a container from a spec; returns the engine container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, CoreError>;

    async fn start_container(&self, id: &str) -> Result<(), CoreError>;

    /// Block until the container exits; returns the exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, CoreError>;

    /// Stream combined stdout/stderr (timestamped) until the container
    /// exits, returning everything captured.
    async fn follow_logs(&self, id: &str) -> Result<String, CoreError>;

    /// Snapshot of combined stdout/stderr, optionally limited to a tail.
    async fn container_logs(&self, id: &str, tail: Option<u32>) -> Result<String, CoreError>;

    /// Graceful stop with the given grace period. Already-stopped and
    /// already-removed containers are not errors.
    async fn stop_container(&self, id: &str, grace_secs: i32) -> Result<(), CoreError>;

    /// Remove a container. Already-removed containers are not errors.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), CoreError>;

    /// List containers carrying this system's managed label, optionally
    /// restricted to the given engine states (e.g. `["exited", "dead"]`).
    async fn list_managed(
        &self,
        all: bool,
        states: &[&str],
    ) -> Result<Vec<ContainerSummaryInfo>, CoreError>;

    async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, CoreError>;
}

/// bollard-backed engine.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the engine control socket configured at startup.
    pub fn connect(socket: &str) -> Result<Self, CoreError> {
        let docker = Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
        let profile = &spec.profile;

        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| {
                format!(
                    "{}:{}:{}",
                    m.host_path,
                    m.container_path,
                    if m.read_only { "ro" } else { "rw" }
                )
            })
            .collect();

        let mut host_config = HostConfig {
            binds: Some(binds),
            memory: Some(profile.memory_bytes),
            nano_cpus: Some(profile.nano_cpus),
            readonly_rootfs: Some(profile.readonly_rootfs),
            auto_remove: Some(profile.auto_remove),
            ..Default::default()
        };
        if profile.cap_drop_all {
            host_config.cap_drop = Some(vec!["ALL".to_string()]);
        }
        if profile.no_new_privileges {
            host_config.security_opt = Some(vec!["no-new-privileges:true".to_string()]);
        }
        host_config.network_mode = Some(match &profile.network {
            NetworkPolicy::Isolated => "none".to_string(),
            NetworkPolicy::Bridge(name) => name.clone(),
        });
        if !profile.tmpfs.is_empty() {
            host_config.tmpfs = Some(profile.tmpfs.iter().cloned().collect());
        }
        if let Some(retries) = profile.max_restart_retries {
            host_config.restart_policy = Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(retries),
            });
        }

        let mut exposed_ports = None;
        if let Some(map) = &spec.port_map {
            let key = format!("{}/tcp", map.container_port);
            exposed_ports = Some(vec![key.clone()]);
            host_config.port_bindings = Some(HashMap::from([(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(map.host_port.to_string()),
                }]),
            )]));
        }

        ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            user: profile.user.clone(),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports,
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn collect_logs(&self, id: &str, follow: bool, tail: Option<u32>) -> String {
        let mut builder = LogsOptionsBuilder::default()
            .follow(follow)
            .stdout(true)
            .stderr(true)
            .timestamps(true);
        if let Some(n) = tail {
            builder = builder.tail(&n.to_string());
        }
        let mut stream = self.docker.logs(id, Some(builder.build()));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(line) => output.push_str(&line.to_string()),
                // Auto-removed containers can vanish mid-stream; keep what
                // we already captured.
                Err(_) => break,
            }
        }
        output
    }
}

fn ignore_http_statuses(
    result: Result<(), bollard::errors::Error>,
    acceptable: &[u16],
) -> Result<(), CoreError> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError { status_code, .. })
            if acceptable.contains(&status_code) =>
        {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), CoreError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), CoreError> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let options = ListNetworksOptionsBuilder::default().filters(&filters).build();
        let networks = self.docker.list_networks(Some(options)).await?;
        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }
        tracing::info!(network = name, "creating isolation network");
        let created = self
            .docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            })
            .await;
        // A concurrent creator winning the race is fine.
        match created {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, CoreError> {
        let options = CreateContainerOptionsBuilder::default().name(&spec.name).build();
        let response = self
            .docker
            .create_container(Some(options), Self::create_body(spec))
            .await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), CoreError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, CoreError> {
        let mut stream = self.docker.wait_container(id, None::<WaitContainerOptions>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as a dedicated error carrying
            // the code; that is a normal builder outcome for us.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(CoreError::Other(anyhow::anyhow!(
                "wait stream for container {} ended without a response",
                id
            ))),
        }
    }

    async fn follow_logs(&self, id: &str) -> Result<String, CoreError> {
        Ok(self.collect_logs(id, true, None).await)
    }

    async fn container_logs(&self, id: &str, tail: Option<u32>) -> Result<String, CoreError> {
        Ok(self.collect_logs(id, false, tail).await)
    }

    async fn stop_container(&self, id: &str, grace_secs: i32) -> Result<(), CoreError> {
        let options = StopContainerOptionsBuilder::default().t(grace_secs).build();
        // 304 = already stopped, 404 = already gone.
        ignore_http_statuses(
            self.docker.stop_container(id, Some(options)).await,
            &[304, 404],
        )
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), CoreError> {
        let options = RemoveContainerOptionsBuilder::default().force(force).v(true).build();
        ignore_http_statuses(self.docker.remove_container(id, Some(options)).await, &[404])
    }

    async fn list_managed(
        &self,
        all: bool,
        states: &[&str],
    ) -> Result<Vec<ContainerSummaryInfo>, CoreError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        )]);
        if !states.is_empty() {
            filters.insert(
                "status".to_string(),
                states.iter().map(|s| s.to_string()).collect(),
            );
        }
        let options = ListContainersOptionsBuilder::default()
            .all(all)
            .filters(&filters)
            .build();
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummaryInfo {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                host_port: c
                    .ports
                    .as_ref()
                    .and_then(|ports| ports.iter().find_map(|p| p.public_port)),
            })
            .collect())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, CoreError> {
        let options = StatsOptionsBuilder::default().stream(false).one_shot(true).build();
        let mut stream = self.docker.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => Ok(ContainerStatsSnapshot {
                memory_usage_bytes: stats
                    .memory_stats
                    .as_ref()
                    .and_then(|m| m.usage)
                    .unwrap_or(0),
                memory_limit_bytes: stats
                    .memory_stats
                    .as_ref()
                    .and_then(|m| m.limit)
                    .unwrap_or(0),
                cpu_total_usage: stats
                    .cpu_stats
                    .as_ref()
                    .and_then(|c| c.cpu_usage.as_ref())
                    .and_then(|u| u.total_usage)
                    .unwrap_or(0),
            }),
            Some(Err(e)) => Err(e.into()),
            None => Ok(ContainerStatsSnapshot::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::preview::profiles::{builder_spec, runner_spec};
    use std::path::PathBuf;

    #[test]
    fn test_builder_body_has_isolated_network_and_rw_bind() {
        let cfg = CoreConfig::default();
        let spec = builder_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), "abcd1234");
        let body = DockerEngine::create_body(&spec);
        let host = body.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.binds.unwrap(),
            vec!["/srv/acme:/workspace:rw".to_string()]
        );
        assert!(body.exposed_ports.is_none());
    }

    #[test]
    fn test_runner_body_is_hardened_and_port_mapped() {
        let cfg = CoreConfig::default();
        let spec = runner_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), 3042);
        let body = DockerEngine::create_body(&spec);
        assert_eq!(body.user.as_deref(), Some("1000:1000"));

        let host = body.host_config.unwrap();
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some(&*cfg.network_name));
        assert_eq!(
            host.binds.unwrap(),
            vec!["/srv/acme:/workspace:ro".to_string()]
        );
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );

        let bindings = host.port_bindings.unwrap();
        let binding = bindings.get("3000/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("3042"));

        let restart = host.restart_policy.unwrap();
        assert_eq!(restart.maximum_retry_count, Some(3));
        assert!(body.exposed_ports.unwrap().contains(&"3000/tcp".to_string()));
    }

    #[test]
    fn test_memory_and_cpu_ceilings_applied() {
        let cfg = CoreConfig::default();
        let spec = runner_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), 3001);
        let host = DockerEngine::create_body(&spec).host_config.unwrap();
        assert_eq!(host.memory, Some(cfg.runner_memory_bytes));
        assert_eq!(host.nano_cpus, Some(cfg.runner_nano_cpus));
    }
}
