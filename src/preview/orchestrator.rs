//! Orchestration facade over the port registry and the lifecycle manager.
//!
//! Composes the two subsystems into the three caller-facing flows (build,
//! deploy, stop) and owns the compensation rules: any failure after a
//! resource was acquired releases that resource before the error reaches
//! the caller. Record writes go through the store inline with each
//! transition; audit events are best-effort.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::errors::CoreError;

use super::engine::ContainerEngine;
use super::health::HealthCheckOptions;
use super::lifecycle::ContainerManager;
use super::models::{
    BuildOutcome, DeployOutcome, EventKind, EventRecord, PreviewRecord,
};
use super::ports::PortRegistry;
use super::profiles::PROJECT_LABEL;
use super::store::{RecordStore, emit_event};

pub struct Orchestrator {
    config: CoreConfig,
    ports: Arc<PortRegistry>,
    manager: ContainerManager,
    store: Arc<dyn RecordStore>,
}

impl Orchestrator {
    pub fn new(
        config: CoreConfig,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let ports = Arc::new(PortRegistry::new(
            config.range_start,
            config.range_end,
            store.clone(),
        ));
        let manager = ContainerManager::new(engine, store.clone(), config.clone());
        Ok(Self {
            config,
            ports,
            manager,
            store,
        })
    }

    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    pub fn manager(&self) -> &ContainerManager {
        &self.manager
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Startup sequence: verify the engine is reachable, make sure the
    /// preview network exists, sweep dead containers, and rebuild port
    /// allocations from the containers still running.
    pub async fn prepare(&self) -> Result<(), CoreError> {
        self.manager.ping().await?;
        self.manager.ensure_network().await?;
        let removed = self.manager.cleanup_stopped_containers().await?;
        let reconciled = self.reconcile_allocations().await?;
        info!(removed, reconciled, "orchestrator ready");
        Ok(())
    }

    /// Rebuild the in-memory port pool from live managed containers. For
    /// each running runner with a published host port, re-reserve that port
    /// for its labeled project so new deploys cannot collide with it.
    pub async fn reconcile_allocations(&self) -> Result<usize, CoreError> {
        let running = self.manager.engine().list_managed(false, &["running"]).await?;
        let mut reconciled = 0;
        for container in &running {
            let Some(project) = container.labels.get(PROJECT_LABEL) else {
                continue;
            };
            let Some(port) = container.host_port else {
                continue;
            };
            match self.ports.reserve_port(project, port) {
                Ok(()) => {
                    info!(project, port, container = %container.name, "reconciled port allocation");
                    reconciled += 1;
                }
                Err(e) => {
                    warn!(project, port, error = %e, "could not reconcile allocation");
                }
            }
        }
        Ok(reconciled)
    }

    /// Run a build for a project. Project-caused failures come back as a
    /// failed [`BuildOutcome`]; only engine faults are `Err`.
    pub async fn build_project(
        &self,
        project_id: &str,
        user_id: &str,
        project_path: &Path,
    ) -> Result<BuildOutcome, CoreError> {
        self.manager.run_build(project_id, user_id, project_path).await
    }

    /// Deploy a built project: allocate a port, start a runner, verify
    /// liveness. On any failure after allocation the port goes back to the
    /// pool before the error is returned.
    pub async fn deploy_project(
        &self,
        project_id: &str,
        build_id: Uuid,
        user_id: &str,
        project_path: &Path,
    ) -> Result<DeployOutcome, CoreError> {
        let port = self.ports.allocate_port(project_id)?;
        match self
            .deploy_at_port(project_id, build_id, user_id, project_path, port)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release_err) = self.ports.release_port(project_id) {
                    error!(project = project_id, port, error = %release_err,
                        "failed to release port while unwinding deploy");
                }
                Err(e)
            }
        }
    }

    async fn deploy_at_port(
        &self,
        project_id: &str,
        build_id: Uuid,
        user_id: &str,
        project_path: &Path,
        port: u16,
    ) -> Result<DeployOutcome, CoreError> {
        // A previous runner for this project may still exist under the
        // deterministic name; clear it before creating the replacement.
        self.manager
            .stop_and_remove(&self.config.runner_container_name(project_id))
            .await?;

        let (container_id, container_name) = match self
            .manager
            .create_runner(project_id, project_path, port)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                emit_event(
                    self.store.as_ref(),
                    EventRecord::new(
                        EventKind::DeployFailed,
                        "error",
                        format!("deploy failed for project {}: {}", project_id, e),
                        json!({ "project_id": project_id, "port": port }),
                        None,
                    ),
                )
                .await;
                return Err(e);
            }
        };

        let host = self.config.preview_host(project_id);
        let mut preview = PreviewRecord::starting(
            project_id,
            build_id,
            user_id,
            &container_id,
            &container_name,
            &host,
            port,
        );
        self.store
            .create_preview(&preview)
            .await
            .map_err(CoreError::Store)?;

        if let Err(e) = self.manager.start_container(&container_id).await {
            if let Err(cleanup_err) = self.manager.stop_and_remove(&container_id).await {
                error!(container = %container_id, error = %cleanup_err,
                    "failed to remove runner that never started");
            }
            self.fail_preview(&mut preview, 0, &e.to_string()).await;
            return Err(e);
        }

        info!(project = project_id, port, container = %container_name, "runner started, probing liveness");
        let report = self.ports.health_check(port, &self.health_options()).await?;

        if !report.healthy {
            let reason = report
                .reason
                .clone()
                .unwrap_or_else(|| "liveness probe failed".to_string());
            if let Err(cleanup_err) = self.manager.stop_and_remove(&container_id).await {
                error!(container = %container_id, error = %cleanup_err,
                    "failed to tear down unhealthy runner");
            }
            self.fail_preview(&mut preview, report.attempts, &reason).await;
            return Err(CoreError::HealthCheckFailed {
                preview_id: preview.id.to_string(),
                port,
                attempts: report.attempts,
            });
        }

        preview.mark_healthy(report.attempts, report.status_code);
        self.store
            .update_preview(&preview)
            .await
            .map_err(CoreError::Store)?;
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                EventKind::DeploySucceeded,
                "ok",
                format!("preview healthy for project {} on port {}", project_id, port),
                json!({
                    "preview_id": preview.id,
                    "project_id": project_id,
                    "port": port,
                    "attempts": report.attempts,
                }),
                Some(user_id),
            ),
        )
        .await;

        Ok(DeployOutcome {
            success: true,
            preview_id: preview.id,
            container_id,
            container_name,
            port,
            host: host.clone(),
            url: format!("http://{}:{}", host, port),
        })
    }

    /// Mark a preview failed and emit the deploy-failed audit event. Record
    /// and event write failures are logged here; they never replace the
    /// error that triggered the transition.
    async fn fail_preview(&self, preview: &mut PreviewRecord, attempts: u32, reason: &str) {
        preview.mark_failed(attempts);
        if let Err(e) = self.store.update_preview(preview).await {
            error!(preview = %preview.id, error = %e, "failed to record preview failure");
        }
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                EventKind::DeployFailed,
                "error",
                format!(
                    "deploy failed for project {}: {}",
                    preview.project_id, reason
                ),
                json!({
                    "preview_id": preview.id,
                    "project_id": preview.project_id,
                    "port": preview.port,
                    "attempts": attempts,
                }),
                None,
            ),
        )
        .await;
    }

    /// Tear down a running preview: stop and remove its container, release
    /// its port, close out the record.
    pub async fn stop_container(
        &self,
        preview_id: Uuid,
        container_id: &str,
        project_id: &str,
    ) -> Result<(), CoreError> {
        self.manager.stop_and_remove(container_id).await?;
        let released = self.ports.release_port(project_id)?;
        self.store
            .stop_preview(preview_id, chrono::Utc::now())
            .await
            .map_err(CoreError::Store)?;
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                EventKind::PreviewStopped,
                "ok",
                format!("preview stopped for project {}", project_id),
                json!({
                    "preview_id": preview_id,
                    "project_id": project_id,
                    "port": released,
                }),
                None,
            ),
        )
        .await;
        info!(project = project_id, preview = %preview_id, port = ?released, "preview stopped");
        Ok(())
    }

    fn health_options(&self) -> HealthCheckOptions {
        HealthCheckOptions {
            max_attempts: self.config.health_max_attempts,
            interval: Duration::from_millis(self.config.health_interval_ms),
            timeout: Duration::from_millis(self.config.health_timeout_ms),
            path: "/".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_options_follow_config() {
        let config = CoreConfig {
            health_max_attempts: 5,
            health_interval_ms: 200,
            health_timeout_ms: 400,
            ..CoreConfig::default()
        };
        let orch = Orchestrator::new(
            config,
            Arc::new(NoopEngine),
            Arc::new(crate::preview::store::MemoryStore::new()),
        )
        .unwrap();
        let opts = orch.health_options();
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.interval, Duration::from_millis(200));
        assert_eq!(opts.timeout, Duration::from_millis(400));
    }

    #[test]
    fn test_new_rejects_inverted_port_range() {
        let config = CoreConfig {
            range_start: 4000,
            range_end: 3000,
            ..CoreConfig::default()
        };
        let result = Orchestrator::new(
            config,
            Arc::new(NoopEngine),
            Arc::new(crate::preview::store::MemoryStore::new()),
        );
        assert!(result.is_err());
    }

    struct NoopEngine;

    #[async_trait::async_trait]
    impl ContainerEngine for NoopEngine {
        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn ensure_network(&self, _name: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn create_container(
            &self,
            _spec: &crate::preview::profiles::ContainerSpec,
        ) -> Result<String, CoreError> {
            Ok("ctr".to_string())
        }
        async fn start_container(&self, _id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn wait_container(&self, _id: &str) -> Result<i64, CoreError> {
            Ok(0)
        }
        async fn follow_logs(&self, _id: &str) -> Result<String, CoreError> {
            Ok(String::new())
        }
        async fn container_logs(
            &self,
            _id: &str,
            _tail: Option<u32>,
        ) -> Result<String, CoreError> {
            Ok(String::new())
        }
        async fn stop_container(&self, _id: &str, _grace_secs: i32) -> Result<(), CoreError> {
            Ok(())
        }
        async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), CoreError> {
            Ok(())
        }
        async fn list_managed(
            &self,
            _all: bool,
            _states: &[&str],
        ) -> Result<Vec<crate::preview::engine::ContainerSummaryInfo>, CoreError> {
            Ok(Vec::new())
        }
        async fn container_stats(
            &self,
            _id: &str,
        ) -> Result<crate::preview::engine::ContainerStatsSnapshot, CoreError> {
            Ok(crate::preview::engine::ContainerStatsSnapshot::default())
        }
    }
}
