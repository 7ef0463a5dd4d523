//! Multi-tenant preview deployment core: port leasing, sandboxed build and
//! run containers, and an orchestration facade with compensating cleanup.

pub mod config;
pub mod errors;
pub mod preview;

pub use config::CoreConfig;
pub use errors::CoreError;
