//! Runtime configuration for the orchestration core.
//!
//! All values are read once at startup from `BERTH_*` environment variables
//! (with a `.env` file honored via dotenvy); the core exposes no runtime
//! reconfiguration API.

use std::str::FromStr;

use anyhow::{Result, anyhow};

/// Startup configuration consumed by the orchestrator, the port registry
/// and the container lifecycle manager.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Container engine socket location.
    pub docker_socket: String,
    /// Name of the bridge network runner containers attach to.
    pub network_name: String,
    /// Inclusive host port range owned by the port registry.
    pub range_start: u16,
    pub range_end: u16,
    /// Images for the two container phases.
    pub builder_image: String,
    pub runner_image: String,
    /// Commands run inside the builder / runner containers.
    pub builder_cmd: Vec<String>,
    pub runner_cmd: Vec<String>,
    /// Hard resource ceilings per phase.
    pub builder_memory_bytes: i64,
    pub runner_memory_bytes: i64,
    pub builder_nano_cpus: i64,
    pub runner_nano_cpus: i64,
    /// Fixed port the runner process listens on inside the container.
    pub container_port: u16,
    /// Domain suffix used to derive preview hostnames.
    pub preview_domain: String,
    /// Grace period passed to the engine when stopping a runner.
    pub stop_grace_secs: i32,
    /// Numeric non-root user the runner executes as.
    pub runner_uid: u32,
    /// Engine-level restart cap for runner containers.
    pub restart_max_retries: i64,
    /// Liveness protocol defaults for the deploy pipeline.
    pub health_max_attempts: u32,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            network_name: "berth-previews".to_string(),
            range_start: 3001,
            range_end: 3999,
            builder_image: "node:20-alpine".to_string(),
            runner_image: "node:20-alpine".to_string(),
            builder_cmd: shell_cmd("npm install && npm run build --if-present"),
            runner_cmd: shell_cmd("npm start"),
            builder_memory_bytes: 2 * 1024 * 1024 * 1024,
            runner_memory_bytes: 512 * 1024 * 1024,
            builder_nano_cpus: 2_000_000_000,
            runner_nano_cpus: 1_000_000_000,
            container_port: 3000,
            preview_domain: "preview.localhost".to_string(),
            stop_grace_secs: 10,
            runner_uid: 1000,
            restart_max_retries: 3,
            health_max_attempts: 30,
            health_interval_ms: 1000,
            health_timeout_ms: 2000,
        }
    }
}

fn shell_cmd(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

impl CoreConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            docker_socket: env_or("BERTH_DOCKER_SOCKET", defaults.docker_socket)?,
            network_name: env_or("BERTH_NETWORK", defaults.network_name)?,
            range_start: env_or("BERTH_PORT_RANGE_START", defaults.range_start)?,
            range_end: env_or("BERTH_PORT_RANGE_END", defaults.range_end)?,
            builder_image: env_or("BERTH_BUILDER_IMAGE", defaults.builder_image)?,
            runner_image: env_or("BERTH_RUNNER_IMAGE", defaults.runner_image)?,
            builder_cmd: match std::env::var("BERTH_BUILDER_CMD") {
                Ok(script) => shell_cmd(&script),
                Err(_) => defaults.builder_cmd,
            },
            runner_cmd: match std::env::var("BERTH_RUNNER_CMD") {
                Ok(script) => shell_cmd(&script),
                Err(_) => defaults.runner_cmd,
            },
            builder_memory_bytes: env_or("BERTH_BUILDER_MEMORY", defaults.builder_memory_bytes)?,
            runner_memory_bytes: env_or("BERTH_RUNNER_MEMORY", defaults.runner_memory_bytes)?,
            builder_nano_cpus: env_or("BERTH_BUILDER_NANO_CPUS", defaults.builder_nano_cpus)?,
            runner_nano_cpus: env_or("BERTH_RUNNER_NANO_CPUS", defaults.runner_nano_cpus)?,
            container_port: env_or("BERTH_CONTAINER_PORT", defaults.container_port)?,
            preview_domain: env_or("BERTH_PREVIEW_DOMAIN", defaults.preview_domain)?,
            stop_grace_secs: env_or("BERTH_STOP_GRACE_SECS", defaults.stop_grace_secs)?,
            runner_uid: env_or("BERTH_RUNNER_UID", defaults.runner_uid)?,
            restart_max_retries: env_or("BERTH_RESTART_RETRIES", defaults.restart_max_retries)?,
            health_max_attempts: env_or("BERTH_HEALTH_ATTEMPTS", defaults.health_max_attempts)?,
            health_interval_ms: env_or("BERTH_HEALTH_INTERVAL_MS", defaults.health_interval_ms)?,
            health_timeout_ms: env_or("BERTH_HEALTH_TIMEOUT_MS", defaults.health_timeout_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.range_start > self.range_end {
            return Err(anyhow!(
                "port range start {} exceeds end {}",
                self.range_start,
                self.range_end
            ));
        }
        if self.container_port == 0 {
            return Err(anyhow!("container port must be non-zero"));
        }
        Ok(())
    }

    /// Public hostname for a project's preview.
    pub fn preview_host(&self, project_id: &str) -> String {
        format!("{}.{}", project_id, self.preview_domain)
    }

    /// Deterministic runner container name for a project.
    pub fn runner_container_name(&self, project_id: &str) -> String {
        format!("berth-preview-{}", project_id)
    }

    pub fn total_ports(&self) -> usize {
        (self.range_end as usize + 1).saturating_sub(self.range_start as usize)
    }
}
