//! Preview orchestration — the resource-orchestration core.
//!
//! ## Overview
//!
//! This subsystem turns a user's source tree into a running, network-reachable
//! preview. An untrusted **builder** container compiles the project, then a
//! hardened **runner** container serves the artifact on a host port leased
//! from the port registry and verified live before it is announced healthy.
//!
//! ## Module Map
//!
//! ```text
//! ┌────────────┐  build_project / deploy_project / stop_container
//! │   Caller   │ ──────────────────────────────────────────────────┐
//! └────────────┘                                                   v
//!                  orchestrator.rs  (Orchestrator facade, compensation)
//!                        │                         │
//!                        │ allocate/release/probe  │ create/start/wait/remove
//!                        v                         v
//!                  ports.rs (PortRegistry)   lifecycle.rs (ContainerManager)
//!                        │                         │
//!                        v                         v
//!                  health.rs (HealthChecker) engine.rs (ContainerEngine trait,
//!                                                       DockerEngine/bollard)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `models`   | `BuildRecord`, `PreviewRecord`, `EventRecord`, statuses   |
//! | `store`    | `RecordStore` trait (persistence collaborator seam)       |
//! | `profiles` | Builder/runner security profiles as declarative data      |
//!
//! ## Ordering guarantees
//!
//! Within one deploy call: port allocation precedes container creation,
//! which precedes the liveness check, which precedes marking the preview
//! healthy. Every failure path compensates (stop/remove the container,
//! release the port) before the error is returned.

pub mod engine;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod profiles;
pub mod store;

pub use engine::{ContainerEngine, ContainerStatsSnapshot, ContainerSummaryInfo, DockerEngine};
pub use health::{HealthCheckOptions, HealthChecker, HealthReport};
pub use lifecycle::ContainerManager;
pub use models::{
    BuildOutcome, BuildRecord, BuildStatus, DeployOutcome, EventKind, EventRecord, PreviewRecord,
    PreviewStatus,
};
pub use orchestrator::Orchestrator;
pub use ports::{BatchHealthReport, PoolStats, PortRegistry};
pub use profiles::{BindMount, ContainerSpec, NetworkPolicy, PortMap, SecurityProfile};
pub use store::{MemoryStore, RecordStore};
