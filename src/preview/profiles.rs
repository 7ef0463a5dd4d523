//! Builder and runner security profiles, expressed as data.
//!
//! The two container phases get distinct profiles: the builder is untrusted
//! and runs fully network-isolated with read-write access to the project
//! tree; the runner is hardened (non-root, read-only rootfs, noexec tmp)
//! and only ever sees the project read-only. Keeping the profiles as plain
//! structs lets them be unit-tested without touching the engine.

use std::collections::HashMap;
use std::path::Path;

use crate::config::CoreConfig;

/// Label marking containers managed by this system. Used by cleanup sweeps
/// and startup reconciliation.
pub const MANAGED_LABEL: &str = "io.berth.managed";
pub const PROJECT_LABEL: &str = "io.berth.project";
pub const ROLE_LABEL: &str = "io.berth.role";

/// Mount point of the project tree inside both container phases.
pub const WORKSPACE_DIR: &str = "/workspace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network access at all (`network_mode: none`).
    Isolated,
    /// Attached to a named bridge network.
    Bridge(String),
}

#[derive(Debug, Clone)]
pub struct SecurityProfile {
    /// `uid:gid` the container process runs as; `None` = image default.
    pub user: Option<String>,
    pub cap_drop_all: bool,
    pub no_new_privileges: bool,
    pub readonly_rootfs: bool,
    pub network: NetworkPolicy,
    /// Tmpfs mounts as (path, mount options).
    pub tmpfs: Vec<(String, String)>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    /// Engine removes the container after exit.
    pub auto_remove: bool,
    /// `on-failure` restart cap; `None` = never restart.
    pub max_restart_retries: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    pub container_port: u16,
    pub host_port: u16,
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub working_dir: String,
    pub mounts: Vec<BindMount>,
    pub port_map: Option<PortMap>,
    pub profile: SecurityProfile,
}

fn labels(project_id: &str, role: &str) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (PROJECT_LABEL.to_string(), project_id.to_string()),
        (ROLE_LABEL.to_string(), role.to_string()),
    ])
}

pub fn builder_profile(config: &CoreConfig) -> SecurityProfile {
    SecurityProfile {
        user: None,
        cap_drop_all: true,
        no_new_privileges: true,
        readonly_rootfs: false,
        network: NetworkPolicy::Isolated,
        tmpfs: Vec::new(),
        memory_bytes: config.builder_memory_bytes,
        nano_cpus: config.builder_nano_cpus,
        auto_remove: true,
        max_restart_retries: None,
    }
}

pub fn runner_profile(config: &CoreConfig) -> SecurityProfile {
    SecurityProfile {
        user: Some(format!("{0}:{0}", config.runner_uid)),
        cap_drop_all: true,
        no_new_privileges: true,
        readonly_rootfs: true,
        network: NetworkPolicy::Bridge(config.network_name.clone()),
        tmpfs: vec![(
            "/tmp".to_string(),
            "rw,noexec,nosuid,size=64m".to_string(),
        )],
        memory_bytes: config.runner_memory_bytes,
        nano_cpus: config.runner_nano_cpus,
        auto_remove: false,
        max_restart_retries: Some(config.restart_max_retries),
    }
}

/// Spec for the one-shot builder container: project tree mounted read-write,
/// no ports, removed by the engine after exit.
pub fn builder_spec(
    config: &CoreConfig,
    project_id: &str,
    project_path: &Path,
    build_id: &str,
) -> ContainerSpec {
    let short_id = &build_id[..build_id.len().min(8)];
    ContainerSpec {
        name: format!("berth-build-{}-{}", project_id, short_id),
        image: config.builder_image.clone(),
        cmd: config.builder_cmd.clone(),
        env: vec![format!("BERTH_PROJECT_ID={}", project_id)],
        labels: labels(project_id, "builder"),
        working_dir: WORKSPACE_DIR.to_string(),
        mounts: vec![BindMount {
            host_path: project_path.display().to_string(),
            container_path: WORKSPACE_DIR.to_string(),
            read_only: false,
        }],
        port_map: None,
        profile: builder_profile(config),
    }
}

/// Spec for the long-lived runner container: project tree read-only, fixed
/// container port mapped to the allocated host port.
pub fn runner_spec(
    config: &CoreConfig,
    project_id: &str,
    project_path: &Path,
    host_port: u16,
) -> ContainerSpec {
    ContainerSpec {
        name: config.runner_container_name(project_id),
        image: config.runner_image.clone(),
        cmd: config.runner_cmd.clone(),
        env: vec![
            format!("PORT={}", config.container_port),
            format!("BERTH_PROJECT_ID={}", project_id),
        ],
        labels: labels(project_id, "runner"),
        working_dir: WORKSPACE_DIR.to_string(),
        mounts: vec![BindMount {
            host_path: project_path.display().to_string(),
            container_path: WORKSPACE_DIR.to_string(),
            read_only: true,
        }],
        port_map: Some(PortMap {
            container_port: config.container_port,
            host_port,
        }),
        profile: runner_profile(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> CoreConfig {
        CoreConfig::default()
    }

    #[test]
    fn test_builder_profile_is_network_isolated() {
        let profile = builder_profile(&config());
        assert_eq!(profile.network, NetworkPolicy::Isolated);
        assert!(profile.cap_drop_all);
        assert!(profile.no_new_privileges);
        assert!(profile.auto_remove);
        assert!(profile.max_restart_retries.is_none());
    }

    #[test]
    fn test_runner_profile_is_hardened() {
        let cfg = config();
        let profile = runner_profile(&cfg);
        assert_eq!(profile.user.as_deref(), Some("1000:1000"));
        assert!(profile.readonly_rootfs);
        assert!(profile.cap_drop_all);
        assert_eq!(profile.max_restart_retries, Some(3));
        assert_eq!(
            profile.network,
            NetworkPolicy::Bridge(cfg.network_name.clone())
        );
        let (_, tmp_opts) = &profile.tmpfs[0];
        assert!(tmp_opts.contains("noexec"));
    }

    #[test]
    fn test_runner_never_gets_write_access_to_project_mount() {
        let spec = runner_spec(&config(), "acme", &PathBuf::from("/srv/acme"), 3001);
        assert!(spec.mounts.iter().all(|m| m.read_only));
    }

    #[test]
    fn test_builder_gets_read_write_project_mount_and_no_ports() {
        let spec = builder_spec(
            &config(),
            "acme",
            &PathBuf::from("/srv/acme"),
            "0f3b2a1c-dead-beef-0000-000000000000",
        );
        assert_eq!(spec.mounts.len(), 1);
        assert!(!spec.mounts[0].read_only);
        assert!(spec.port_map.is_none());
        assert_eq!(spec.name, "berth-build-acme-0f3b2a1c");
    }

    #[test]
    fn test_runner_spec_maps_fixed_container_port() {
        let cfg = config();
        let spec = runner_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), 3042);
        let map = spec.port_map.unwrap();
        assert_eq!(map.container_port, cfg.container_port);
        assert_eq!(map.host_port, 3042);
        assert!(spec.env.iter().any(|e| e == "PORT=3000"));
    }

    #[test]
    fn test_both_specs_carry_managed_labels() {
        let cfg = config();
        for spec in [
            builder_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), "abcd1234"),
            runner_spec(&cfg, "acme", &PathBuf::from("/srv/acme"), 3001),
        ] {
            assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
            assert_eq!(spec.labels.get(PROJECT_LABEL).map(String::as_str), Some("acme"));
            assert!(spec.labels.contains_key(ROLE_LABEL));
        }
    }
}
