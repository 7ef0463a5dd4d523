//! Persistence seam for build/preview/event records.
//!
//! The core writes records synchronously, inline with its state transitions,
//! through the [`RecordStore`] trait; it never buffers or batches. Event
//! appends are best-effort via [`emit_event`] so an audit failure can never
//! mask a pipeline error or abort a compensating action.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{BuildRecord, EventRecord, PreviewRecord, PreviewStatus};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_build(&self, build: &BuildRecord) -> Result<()>;
    async fn update_build(&self, build: &BuildRecord) -> Result<()>;
    async fn create_preview(&self, preview: &PreviewRecord) -> Result<()>;
    async fn update_preview(&self, preview: &PreviewRecord) -> Result<()>;
    async fn stop_preview(&self, preview_id: Uuid, stopped_at: DateTime<Utc>) -> Result<()>;
    async fn append_event(&self, event: &EventRecord) -> Result<()>;
}

/// Append an audit event without letting a store failure propagate.
pub async fn emit_event(store: &dyn RecordStore, event: EventRecord) {
    if let Err(e) = store.append_event(&event).await {
        tracing::warn!(kind = event.kind.as_str(), error = %e, "failed to append audit event");
    }
}

#[derive(Default)]
struct MemoryState {
    builds: HashMap<Uuid, BuildRecord>,
    previews: HashMap<Uuid, PreviewRecord>,
    events: Vec<EventRecord>,
}

/// In-memory `RecordStore` used by tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("store lock poisoned: {}", e))
    }

    pub fn build(&self, id: Uuid) -> Option<BuildRecord> {
        self.lock().ok()?.builds.get(&id).cloned()
    }

    pub fn preview(&self, id: Uuid) -> Option<PreviewRecord> {
        self.lock().ok()?.previews.get(&id).cloned()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    pub fn previews_for_project(&self, project_id: &str) -> Vec<PreviewRecord> {
        self.lock()
            .map(|s| {
                s.previews
                    .values()
                    .filter(|p| p.project_id == project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_build(&self, build: &BuildRecord) -> Result<()> {
        self.lock()?.builds.insert(build.id, build.clone());
        Ok(())
    }

    async fn update_build(&self, build: &BuildRecord) -> Result<()> {
        let mut state = self.lock()?;
        if !state.builds.contains_key(&build.id) {
            return Err(anyhow!("build {} not found", build.id));
        }
        state.builds.insert(build.id, build.clone());
        Ok(())
    }

    async fn create_preview(&self, preview: &PreviewRecord) -> Result<()> {
        self.lock()?.previews.insert(preview.id, preview.clone());
        Ok(())
    }

    async fn update_preview(&self, preview: &PreviewRecord) -> Result<()> {
        let mut state = self.lock()?;
        if !state.previews.contains_key(&preview.id) {
            return Err(anyhow!("preview {} not found", preview.id));
        }
        state.previews.insert(preview.id, preview.clone());
        Ok(())
    }

    async fn stop_preview(&self, preview_id: Uuid, stopped_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let preview = state
            .previews
            .get_mut(&preview_id)
            .ok_or_else(|| anyhow!("preview {} not found", preview_id))?;
        preview.status = PreviewStatus::Stopped;
        preview.stopped_at = Some(stopped_at);
        Ok(())
    }

    async fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }
}
