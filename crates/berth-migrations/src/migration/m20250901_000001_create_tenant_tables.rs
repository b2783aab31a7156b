use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // TENANT_GROUPS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(TenantGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantGroups::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantGroups::TenantId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(TenantGroups::PlanTier).string().not_null())
                    .col(ColumnDef::new(TenantGroups::State).string().not_null())
                    .col(
                        ColumnDef::new(TenantGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TenantGroups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TenantGroups::LastHealthAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantGroups::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The monitor lists by state every cycle, and by expiry for free-tier teardown
        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_groups_state")
                    .table(TenantGroups::Table)
                    .col(TenantGroups::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_groups_expires_at")
                    .table(TenantGroups::Table)
                    .col(TenantGroups::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // SERVICE_INSTANCES TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(ServiceInstances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceInstances::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::GroupId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::ServiceKind)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ServiceInstances::ContainerRef).string().null())
                    .col(
                        ColumnDef::new(ServiceInstances::AssignedPort)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::HealthStatus)
                            .string()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::RestartCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ServiceInstances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_instances_group")
                            .from(ServiceInstances::Table, ServiceInstances::GroupId)
                            .to(TenantGroups::Table, TenantGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_service_instances_group_id")
                    .table(ServiceInstances::Table)
                    .col(ServiceInstances::GroupId)
                    .to_owned(),
            )
            .await?;

        // At most one instance per service kind per group
        manager
            .create_index(
                Index::create()
                    .name("uq_service_instances_group_kind")
                    .table(ServiceInstances::Table)
                    .col(ServiceInstances::GroupId)
                    .col(ServiceInstances::ServiceKind)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServiceInstances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TenantGroups::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum TenantGroups {
    Table,
    Id,
    TenantId,
    PlanTier,
    State,
    CreatedAt,
    UpdatedAt,
    LastHealthAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum ServiceInstances {
    Table,
    Id,
    GroupId,
    ServiceKind,
    ContainerRef,
    AssignedPort,
    HealthStatus,
    RestartCount,
    CreatedAt,
    UpdatedAt,
}
