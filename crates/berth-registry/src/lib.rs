//! Berth Registry - durable record of every tenant container group
//!
//! The registry is the source of truth the orchestrator recovers from after
//! a restart: group state, plan tier, per-service container refs and port
//! assignments all live here. Mutating lifecycle operations serialize per
//! tenant through [`OperationGuard`]s; reads go straight to the database and
//! never wait on a writer.

mod locks;
mod registry;

pub use locks::{OperationGuard, OperationLockTable};
pub use registry::{RegistryError, TenantRegistry};
