//! Berth Orchestrator - lifecycle, health monitoring and the control API
//!
//! The pieces above the storage and runtime layers: the lifecycle manager
//! drives provision/stop/restart/delete with rollback, the health monitor
//! reconciles registry state with what the runtime reports, and the
//! handlers expose both over HTTP. [`OrchestratorPlugin`] assembles the
//! whole stack from registered services.

pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod monitor;
pub mod plugin;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::OrchestratorError;
pub use lifecycle::{container_name, LifecycleManager};
pub use monitor::HealthMonitor;
pub use plugin::OrchestratorPlugin;
