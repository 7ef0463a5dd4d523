//! Typed error hierarchy for the orchestration core.
//!
//! `CoreError` covers the four failure classes the pipelines distinguish:
//! resource exhaustion, precondition failures, engine failures, and
//! health-check failures. Every variant a caller might act on carries
//! machine-readable context (ids, port, exit code).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The port pool has no free port left. Hard failure, no queueing.
    #[error("port pool exhausted: all {total} ports in range are allocated")]
    PoolExhausted { total: usize },

    /// The project path has no recognizable build manifest. Fails fast,
    /// before any container is created.
    #[error("package manifest not found in {}", path.display())]
    ManifestMissing { path: PathBuf },

    /// Every liveness attempt against a freshly deployed runner missed.
    #[error(
        "health check failed for preview {preview_id} on port {port} after {attempts} attempts"
    )]
    HealthCheckFailed {
        preview_id: String,
        port: u16,
        attempts: u32,
    },

    /// A specific port was requested (reservation/reconciliation) but is
    /// already bound to another project.
    #[error("port {port} is not free")]
    PortNotFree { port: u16 },

    #[error("port {port} is outside the managed range {start}-{end}")]
    PortOutOfRange { port: u16, start: u16, end: u16 },

    #[error("port registry lock poisoned")]
    LockPoisoned,

    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    #[error("record store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhausted_carries_total() {
        let err = CoreError::PoolExhausted { total: 99 };
        match &err {
            CoreError::PoolExhausted { total } => assert_eq!(*total, 99),
            _ => panic!("expected PoolExhausted"),
        }
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn manifest_missing_renders_reason_string() {
        let err = CoreError::ManifestMissing {
            path: PathBuf::from("/srv/projects/demo"),
        };
        let msg = err.to_string();
        assert!(msg.contains("package manifest not found"));
        assert!(msg.contains("/srv/projects/demo"));
    }

    #[test]
    fn health_check_failed_carries_retry_context() {
        let err = CoreError::HealthCheckFailed {
            preview_id: "p-1".into(),
            port: 3001,
            attempts: 3,
        };
        match &err {
            CoreError::HealthCheckFailed { port, attempts, .. } => {
                assert_eq!(*port, 3001);
                assert_eq!(*attempts, 3);
            }
            _ => panic!("expected HealthCheckFailed"),
        }
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CoreError::LockPoisoned);
        assert_std_error(&CoreError::PortNotFree { port: 3001 });
    }
}
