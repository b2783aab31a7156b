//! Database entities for the Berth orchestrator
//!
//! Enum-valued columns (`state`, `plan_tier`, `service_kind`,
//! `health_status`) are stored as their lowercase string forms; the
//! registry converts to the typed enums in `berth-core` when assembling
//! domain values.

pub mod service_instances;
pub mod tenant_groups;
