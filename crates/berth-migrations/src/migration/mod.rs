pub use sea_orm_migration::prelude::*;

mod m20250901_000001_create_tenant_tables;
mod m20251005_000001_add_restart_budget_columns;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_create_tenant_tables::Migration),
            Box::new(m20251005_000001_add_restart_budget_columns::Migration),
        ]
    }
}
