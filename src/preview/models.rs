//! Shared record types for builds, previews and audit events.
//!
//! Records are owned by the persistence collaborator; the core creates and
//! mutates them through [`crate::preview::store::RecordStore`] and never
//! caches them. A record with a terminal status is not updated again.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build lifecycle: `queued -> running -> succeeded | failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

/// Preview lifecycle: `starting -> healthy | failed -> stopped`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Starting,
    Healthy,
    Failed,
    Stopped,
}

impl PreviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PreviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "healthy" => Ok(Self::Healthy),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid preview status: {}", s)),
        }
    }
}

/// Kinds of audit events the core emits at significant transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BuildStarted,
    BuildSucceeded,
    BuildFailed,
    DeploySucceeded,
    DeployFailed,
    HealthCheckPassed,
    HealthCheckFailed,
    PortCleanup,
    PreviewStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildStarted => "build_started",
            Self::BuildSucceeded => "build_succeeded",
            Self::BuildFailed => "build_failed",
            Self::DeploySucceeded => "deploy_succeeded",
            Self::DeployFailed => "deploy_failed",
            Self::HealthCheckPassed => "health_check_passed",
            Self::HealthCheckFailed => "health_check_failed",
            Self::PortCleanup => "port_cleanup",
            Self::PreviewStopped => "preview_stopped",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build_started" => Ok(Self::BuildStarted),
            "build_succeeded" => Ok(Self::BuildSucceeded),
            "build_failed" => Ok(Self::BuildFailed),
            "deploy_succeeded" => Ok(Self::DeploySucceeded),
            "deploy_failed" => Ok(Self::DeployFailed),
            "health_check_passed" => Ok(Self::HealthCheckPassed),
            "health_check_failed" => Ok(Self::HealthCheckFailed),
            "port_cleanup" => Ok(Self::PortCleanup),
            "preview_stopped" => Ok(Self::PreviewStopped),
            _ => Err(format!("Invalid event kind: {}", s)),
        }
    }
}

/// One build attempt for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub status: BuildStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub container_id: Option<String>,
    pub image_id: Option<String>,
    pub error_message: Option<String>,
    pub logs: String,
}

impl BuildRecord {
    pub fn queued(project_id: &str, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            status: BuildStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            container_id: None,
            image_id: None,
            error_message: None,
            logs: String::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = BuildStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self, logs: String) {
        self.logs = logs;
        self.finish(BuildStatus::Succeeded);
    }

    pub fn mark_failed(&mut self, error: String, logs: String) {
        self.error_message = Some(error);
        self.logs = logs;
        self.finish(BuildStatus::Failed);
    }

    fn finish(&mut self, status: BuildStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        let from = self.started_at.unwrap_or(self.queued_at);
        self.duration_ms = Some((now - from).num_milliseconds());
    }
}

/// One deployed runner container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRecord {
    pub id: Uuid,
    pub project_id: String,
    pub build_id: Uuid,
    pub user_id: String,
    pub container_id: String,
    pub container_name: String,
    pub host: String,
    pub port: u16,
    pub image_id: Option<String>,
    pub status: PreviewStatus,
    pub health_attempts: u32,
    pub last_status_code: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl PreviewRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn starting(
        project_id: &str,
        build_id: Uuid,
        user_id: &str,
        container_id: &str,
        container_name: &str,
        host: &str,
        port: u16,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            build_id,
            user_id: user_id.to_string(),
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            host: host.to_string(),
            port,
            image_id: None,
            status: PreviewStatus::Starting,
            health_attempts: 0,
            last_status_code: None,
            created_at: Utc::now(),
            stopped_at: None,
        }
    }

    pub fn mark_healthy(&mut self, attempts: u32, status_code: Option<u16>) {
        self.status = PreviewStatus::Healthy;
        self.health_attempts = attempts;
        self.last_status_code = status_code;
    }

    pub fn mark_failed(&mut self, attempts: u32) {
        self.status = PreviewStatus::Failed;
        self.health_attempts = attempts;
    }

    pub fn mark_stopped(&mut self) {
        self.status = PreviewStatus::Stopped;
        self.stopped_at = Some(Utc::now());
    }
}

/// Append-only audit entry. Write-only from the core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub kind: EventKind,
    pub status: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        kind: EventKind,
        status: &str,
        message: String,
        metadata: serde_json::Value,
        actor: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: status.to_string(),
            message,
            metadata,
            actor: actor.map(|a| a.to_string()),
            created_at: Utc::now(),
        }
    }
}

/// Result of `build_project`, returned to the caller for its retry decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub build_id: Uuid,
    pub error: Option<String>,
    pub logs: String,
}

/// Connection info returned by a successful `deploy_project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub success: bool,
    pub preview_id: Uuid,
    pub container_id: String,
    pub container_name: String,
    pub port: u16,
    pub host: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_status_roundtrip() {
        for s in &["queued", "running", "succeeded", "failed"] {
            let parsed: BuildStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_preview_status_roundtrip() {
        for s in &["starting", "healthy", "failed", "stopped"] {
            let parsed: PreviewStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<PreviewStatus>().is_err());
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for s in &[
            "build_started",
            "build_succeeded",
            "build_failed",
            "deploy_succeeded",
            "deploy_failed",
            "health_check_passed",
            "health_check_failed",
            "port_cleanup",
            "preview_stopped",
        ] {
            let parsed: EventKind = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&BuildStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        assert_eq!(
            serde_json::to_string(&PreviewStatus::Starting).unwrap(),
            "\"starting\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::HealthCheckPassed).unwrap(),
            "\"health_check_passed\""
        );
        assert_eq!(
            serde_json::from_str::<EventKind>("\"port_cleanup\"").unwrap(),
            EventKind::PortCleanup
        );
    }

    #[test]
    fn test_build_record_lifecycle() {
        let mut build = BuildRecord::queued("proj-1", "user-1");
        assert_eq!(build.status, BuildStatus::Queued);
        assert!(!build.status.is_terminal());

        build.mark_running();
        assert_eq!(build.status, BuildStatus::Running);
        assert!(build.started_at.is_some());

        build.mark_succeeded("line 1\nline 2\n".to_string());
        assert_eq!(build.status, BuildStatus::Succeeded);
        assert!(build.status.is_terminal());
        assert!(build.finished_at.is_some());
        assert!(build.duration_ms.unwrap() >= 0);
        assert_eq!(build.logs, "line 1\nline 2\n");
    }

    #[test]
    fn test_build_record_failure_keeps_error_and_logs() {
        let mut build = BuildRecord::queued("proj-1", "user-1");
        build.mark_running();
        build.mark_failed("builder exited with code 1".to_string(), "boom".to_string());
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(
            build.error_message.as_deref(),
            Some("builder exited with code 1")
        );
        assert_eq!(build.logs, "boom");
    }

    #[test]
    fn test_preview_record_lifecycle() {
        let build_id = Uuid::new_v4();
        let mut preview = PreviewRecord::starting(
            "proj-1",
            build_id,
            "user-1",
            "abc123",
            "berth-preview-proj-1",
            "proj-1.preview.localhost",
            3001,
        );
        assert_eq!(preview.status, PreviewStatus::Starting);

        preview.mark_healthy(2, Some(200));
        assert_eq!(preview.status, PreviewStatus::Healthy);
        assert_eq!(preview.health_attempts, 2);
        assert_eq!(preview.last_status_code, Some(200));

        preview.mark_stopped();
        assert_eq!(preview.status, PreviewStatus::Stopped);
        assert!(preview.stopped_at.is_some());
    }
}
