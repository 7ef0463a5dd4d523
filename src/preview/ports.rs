//! Port registry: a bounded host-port pool with liveness verification.
//!
//! The registry owns three maps (free pool, project->port, port->project)
//! behind a single mutex so every mutation is one atomic step relative to
//! concurrent callers. A port is always in exactly one of {free pool,
//! allocated-to-exactly-one-project}. Allocations are not persisted; on
//! process restart the orchestrator reconciles the pool against the live
//! engine state before accepting requests.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::CoreError;

use super::health::{HealthCheckOptions, HealthChecker, HealthReport};
use super::models::{EventKind, EventRecord};
use super::store::{RecordStore, emit_event};

struct PoolState {
    free: BTreeSet<u16>,
    by_project: HashMap<String, u16>,
    by_port: HashMap<u16, String>,
}

/// Observability counters for the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub allocated: usize,
    pub utilization_pct: f64,
}

/// Aggregate result of a concurrent multi-port check.
#[derive(Debug, Clone)]
pub struct BatchHealthReport {
    pub healthy: usize,
    pub unhealthy: usize,
    pub results: Vec<(u16, HealthReport)>,
}

pub struct PortRegistry {
    range_start: u16,
    range_end: u16,
    state: Mutex<PoolState>,
    store: Arc<dyn RecordStore>,
    checker: HealthChecker,
}

impl PortRegistry {
    /// Create a registry owning the inclusive range `[range_start, range_end]`,
    /// with the whole range initially free.
    pub fn new(range_start: u16, range_end: u16, store: Arc<dyn RecordStore>) -> Self {
        let free: BTreeSet<u16> = (range_start..=range_end).collect();
        Self {
            range_start,
            range_end,
            state: Mutex::new(PoolState {
                free,
                by_project: HashMap::new(),
                by_port: HashMap::new(),
            }),
            store,
            checker: HealthChecker::new(),
        }
    }

    pub fn total(&self) -> usize {
        (self.range_end as usize + 1).saturating_sub(self.range_start as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>, CoreError> {
        self.state.lock().map_err(|_| CoreError::LockPoisoned)
    }

    /// Allocate a port for a project. Idempotent: a project that already
    /// holds a port gets the same port back. Lowest free port first.
    pub fn allocate_port(&self, project_id: &str) -> Result<u16, CoreError> {
        let mut state = self.lock()?;
        if let Some(&port) = state.by_project.get(project_id) {
            return Ok(port);
        }
        let Some(port) = state.free.pop_first() else {
            return Err(CoreError::PoolExhausted {
                total: self.total(),
            });
        };
        state.by_project.insert(project_id.to_string(), port);
        state.by_port.insert(port, project_id.to_string());
        tracing::info!(project = project_id, port, "allocated preview port");
        Ok(port)
    }

    /// Release a project's port back to the free pool. Returns the released
    /// port, or `None` when the project holds no allocation.
    pub fn release_port(&self, project_id: &str) -> Result<Option<u16>, CoreError> {
        let mut state = self.lock()?;
        let Some(port) = state.by_project.remove(project_id) else {
            return Ok(None);
        };
        state.by_port.remove(&port);
        state.free.insert(port);
        tracing::info!(project = project_id, port, "released preview port");
        Ok(Some(port))
    }

    /// Bind a specific port to a project. Used by startup reconciliation and
    /// by tests; ordinary allocation goes through `allocate_port`.
    pub fn reserve_port(&self, project_id: &str, port: u16) -> Result<(), CoreError> {
        if port < self.range_start || port > self.range_end {
            return Err(CoreError::PortOutOfRange {
                port,
                start: self.range_start,
                end: self.range_end,
            });
        }
        let mut state = self.lock()?;
        if state.by_project.get(project_id) == Some(&port) {
            return Ok(());
        }
        if !state.free.contains(&port) || state.by_project.contains_key(project_id) {
            return Err(CoreError::PortNotFree { port });
        }
        state.free.remove(&port);
        state.by_project.insert(project_id.to_string(), port);
        state.by_port.insert(port, project_id.to_string());
        Ok(())
    }

    /// Destructive: forget every allocation and refill the free pool.
    /// Test/debug only.
    pub fn reset(&self) -> Result<(), CoreError> {
        let mut state = self.lock()?;
        state.by_project.clear();
        state.by_port.clear();
        state.free = (self.range_start..=self.range_end).collect();
        Ok(())
    }

    pub fn is_port_available(&self, port: u16) -> Result<bool, CoreError> {
        Ok(self.lock()?.free.contains(&port))
    }

    pub fn port_for_project(&self, project_id: &str) -> Result<Option<u16>, CoreError> {
        Ok(self.lock()?.by_project.get(project_id).copied())
    }

    pub fn project_for_port(&self, port: u16) -> Result<Option<String>, CoreError> {
        Ok(self.lock()?.by_port.get(&port).cloned())
    }

    pub fn stats(&self) -> Result<PoolStats, CoreError> {
        let state = self.lock()?;
        let total = self.total();
        let available = state.free.len();
        let allocated = state.by_project.len();
        Ok(PoolStats {
            total,
            available,
            allocated,
            utilization_pct: if total == 0 {
                0.0
            } else {
                allocated as f64 / total as f64 * 100.0
            },
        })
    }

    /// Current allocations, sorted by port.
    pub fn allocations(&self) -> Result<Vec<(String, u16)>, CoreError> {
        let state = self.lock()?;
        let mut allocations: Vec<(String, u16)> = state
            .by_project
            .iter()
            .map(|(project, &port)| (project.clone(), port))
            .collect();
        allocations.sort_by_key(|(_, port)| *port);
        Ok(allocations)
    }

    /// Run the liveness protocol against a port and emit an audit event for
    /// the terminal outcome, tagged with the owning project if one is bound.
    pub async fn health_check(
        &self,
        port: u16,
        opts: &HealthCheckOptions,
    ) -> Result<HealthReport, CoreError> {
        let report = self.checker.check(port, opts).await;
        let project = self.project_for_port(port)?;
        let (kind, status) = if report.healthy {
            (EventKind::HealthCheckPassed, "ok")
        } else {
            (EventKind::HealthCheckFailed, "error")
        };
        emit_event(
            self.store.as_ref(),
            EventRecord::new(
                kind,
                status,
                format!("health check on port {}: {}", port, status),
                json!({
                    "port": port,
                    "attempts": report.attempts,
                    "status_code": report.status_code,
                    "project_id": project,
                }),
                None,
            ),
        )
        .await;
        Ok(report)
    }

    /// Run the same check concurrently across a set of ports and aggregate.
    pub async fn batch_health_check(
        &self,
        ports: &[u16],
        opts: &HealthCheckOptions,
    ) -> Result<BatchHealthReport, CoreError> {
        let checks = ports.iter().map(|&port| async move {
            let report = self.health_check(port, opts).await?;
            Ok::<(u16, HealthReport), CoreError>((port, report))
        });
        let mut results = Vec::with_capacity(ports.len());
        for outcome in futures::future::join_all(checks).await {
            results.push(outcome?);
        }
        let healthy = results.iter().filter(|(_, r)| r.healthy).count();
        Ok(BatchHealthReport {
            healthy,
            unhealthy: results.len() - healthy,
            results,
        })
    }

    /// Probe every current allocation with a low-patience check and return
    /// those whose backing service no longer responds.
    pub async fn find_stale_allocations(&self) -> Result<Vec<(String, u16)>, CoreError> {
        let allocations = self.allocations()?;
        let opts = HealthCheckOptions::quick();
        let checks = allocations.iter().map(|(project, port)| {
            let opts = opts.clone();
            async move {
                let report = self.checker.check(*port, &opts).await;
                (project.clone(), *port, report.healthy)
            }
        });
        let results = futures::future::join_all(checks).await;
        Ok(results
            .into_iter()
            .filter(|(_, _, healthy)| !healthy)
            .map(|(project, port, _)| (project, port))
            .collect())
    }

    /// Release every stale allocation, emitting a cleanup event per port.
    /// This is the only path that reclaims ports whose container died without
    /// an explicit stop; an external scheduler must call it periodically.
    pub async fn cleanup_stale_allocations(&self) -> Result<Vec<(String, u16)>, CoreError> {
        let stale = self.find_stale_allocations().await?;
        for (project, port) in &stale {
            self.release_port(project)?;
            emit_event(
                self.store.as_ref(),
                EventRecord::new(
                    EventKind::PortCleanup,
                    "ok",
                    format!("reclaimed stale port {} from project {}", port, project),
                    json!({ "port": port, "project_id": project }),
                    None,
                ),
            )
            .await;
        }
        Ok(stale)
    }
}
