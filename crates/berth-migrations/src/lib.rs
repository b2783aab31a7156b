//! Database migrations for the Berth orchestrator
//!
//! Applied automatically at connection time by `berth-database`.

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;
