//! Container lifecycle manager.
//!
//! Owns the build pipeline (one-shot builder container, exit code decides
//! the outcome) and the create/start/stop/remove plumbing the orchestrator
//! composes into deploys. Build failures caused by the project itself
//! (missing manifest, non-zero builder exit) are recorded outcomes, not
//! errors; only engine faults propagate as `Err`.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::errors::CoreError;

use super::engine::{ContainerEngine, ContainerStatsSnapshot, ContainerSummaryInfo};
use super::models::{BuildOutcome, BuildRecord, EventKind, EventRecord};
use super::profiles::{builder_spec, runner_spec};
use super::store::{RecordStore, emit_event};

/// Build manifest the builder pipeline requires before creating anything.
const MANIFEST_FILE: &str = "package.json";

pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn RecordStore>,
    config: CoreConfig,
}

impl ContainerManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn RecordStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Run one build for a project: queued record, manifest check, builder
    /// container, wait for exit while streaming logs.
    ///
    /// Returns `Ok` with `success: false` when the project is at fault
    /// (missing manifest, non-zero exit); returns `Err` only when the
    /// engine itself fails mid-pipeline, after marking the build failed.
    pub async fn run_build(
        &self,
        project_id: &str,
        user_id: &str,
        project_path: &Path,
    ) -> Result<BuildOutcome, CoreError> {
        let mut build = BuildRecord::queued(project_id, user_id);
        self.store
            .create_build(&build)
            .await
            .map_err(CoreError::Store)?;
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                EventKind::BuildStarted,
                "queued",
                format!("build queued for project {}", project_id),
                serde_json::json!({ "build_id": build.id, "project_id": project_id }),
                Some(user_id),
            ),
        )
        .await;

        // Fail fast before any container exists.
        if !project_path.join(MANIFEST_FILE).is_file() {
            let reason = CoreError::ManifestMissing {
                path: project_path.to_path_buf(),
            }
            .to_string();
            build.mark_failed(reason.clone(), String::new());
            self.store
                .update_build(&build)
                .await
                .map_err(CoreError::Store)?;
            self.emit_build_failed(&build, &reason).await;
            return Ok(BuildOutcome {
                success: false,
                build_id: build.id,
                error: Some(reason),
                logs: String::new(),
            });
        }

        build.mark_running();
        self.store
            .update_build(&build)
            .await
            .map_err(CoreError::Store)?;

        let spec = builder_spec(&self.config, project_id, project_path, &build.id.to_string());
        info!(project = project_id, container = %spec.name, "starting builder container");

        let result = self.run_builder_container(&spec, &mut build).await;
        match result {
            Ok((0, logs)) => {
                build.mark_succeeded(logs.clone());
                self.store
                    .update_build(&build)
                    .await
                    .map_err(CoreError::Store)?;
                emit_event(
                    self.store.as_ref(),
                    EventRecord::new(
                        EventKind::BuildSucceeded,
                        "succeeded",
                        format!("build succeeded for project {}", project_id),
                        serde_json::json!({ "build_id": build.id, "project_id": project_id }),
                        None,
                    ),
                )
                .await;
                Ok(BuildOutcome {
                    success: true,
                    build_id: build.id,
                    error: None,
                    logs,
                })
            }
            Ok((exit, logs)) => {
                let reason = format!("builder exited with code {}", exit);
                build.mark_failed(reason.clone(), logs.clone());
                self.store
                    .update_build(&build)
                    .await
                    .map_err(CoreError::Store)?;
                self.emit_build_failed(&build, &reason).await;
                Ok(BuildOutcome {
                    success: false,
                    build_id: build.id,
                    error: Some(reason),
                    logs,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                build.mark_failed(reason.clone(), String::new());
                self.store
                    .update_build(&build)
                    .await
                    .map_err(CoreError::Store)?;
                self.emit_build_failed(&build, &reason).await;
                Err(e)
            }
        }
    }

    /// Create + start the builder, then wait for exit while following logs
    /// concurrently. The profile uses auto-remove, so log collection must
    /// already be attached when the container exits.
    async fn run_builder_container(
        &self,
        spec: &super::profiles::ContainerSpec,
        build: &mut BuildRecord,
    ) -> Result<(i64, String), CoreError> {
        let id = self.engine.create_container(spec).await?;
        build.container_id = Some(id.clone());
        self.store
            .update_build(build)
            .await
            .map_err(CoreError::Store)?;
        self.engine.start_container(&id).await?;
        let (exit, logs) = tokio::join!(self.engine.wait_container(&id), self.engine.follow_logs(&id));
        let exit = exit?;
        let logs = logs.unwrap_or_default();
        Ok((exit, logs))
    }

    async fn emit_build_failed(&self, build: &BuildRecord, reason: &str) {
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                EventKind::BuildFailed,
                "failed",
                format!("build failed for project {}: {}", build.project_id, reason),
                serde_json::json!({ "build_id": build.id, "project_id": build.project_id }),
                None,
            ),
        )
        .await;
    }

    /// Create (but do not start) the runner container for a project.
    /// Returns the engine container id and the deterministic name.
    pub async fn create_runner(
        &self,
        project_id: &str,
        project_path: &Path,
        host_port: u16,
    ) -> Result<(String, String), CoreError> {
        let spec = runner_spec(&self.config, project_id, project_path, host_port);
        let id = self.engine.create_container(&spec).await?;
        Ok((id, spec.name))
    }

    pub async fn start_container(&self, id: &str) -> Result<(), CoreError> {
        self.engine.start_container(id).await
    }

    /// Graceful stop followed by removal. Safe to call on containers that
    /// already stopped or disappeared.
    pub async fn stop_and_remove(&self, id: &str) -> Result<(), CoreError> {
        self.engine
            .stop_container(id, self.config.stop_grace_secs)
            .await?;
        self.engine.remove_container(id, true).await
    }

    /// Remove managed containers left behind in a dead state. Returns the
    /// number removed.
    pub async fn cleanup_stopped_containers(&self) -> Result<usize, CoreError> {
        let stopped = self
            .engine
            .list_managed(true, &["exited", "dead"])
            .await?;
        let mut removed = 0;
        for container in &stopped {
            match self.engine.remove_container(&container.id, true).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(container = %container.name, error = %e, "failed to remove stopped container")
                }
            }
        }
        if removed > 0 {
            info!(removed, "removed stopped managed containers");
        }
        Ok(removed)
    }

    pub async fn list_containers(
        &self,
        all: bool,
    ) -> Result<Vec<ContainerSummaryInfo>, CoreError> {
        self.engine.list_managed(all, &[]).await
    }

    pub async fn container_logs(&self, id: &str, tail: Option<u32>) -> Result<String, CoreError> {
        self.engine.container_logs(id, tail).await
    }

    pub async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, CoreError> {
        self.engine.container_stats(id).await
    }

    pub async fn ping(&self) -> Result<(), CoreError> {
        self.engine.ping().await
    }

    pub async fn ensure_network(&self) -> Result<(), CoreError> {
        self.engine.ensure_network(&self.config.network_name).await
    }
}
