use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Probe streak for unhealthy -> healthy recovery
        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("service_instances"))
                    .add_column(
                        ColumnDef::new(Alias::new("consecutive_passes"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // Anchor of the auto-restart cooldown window
        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("service_instances"))
                    .add_column(
                        ColumnDef::new(Alias::new("restart_window_start"))
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("service_instances"))
                    .drop_column(Alias::new("restart_window_start"))
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("service_instances"))
                    .drop_column(Alias::new("consecutive_passes"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
