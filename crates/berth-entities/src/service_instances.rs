use async_trait::async_trait;
use berth_core::UtcDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

/// One row per provisioned container of a tenant group.
///
/// `(group_id, service_kind)` is unique: a group holds at most one
/// instance per service kind.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "service_instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub group_id: i32,
    pub service_kind: String,
    /// Runtime-assigned container identifier; null while the container is
    /// being created or after teardown.
    pub container_ref: Option<String>,
    pub assigned_port: i32,
    pub health_status: String,
    pub restart_count: i32,
    pub consecutive_passes: i32,
    pub restart_window_start: Option<UtcDateTime>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant_groups::Entity",
        from = "Column::GroupId",
        to = "super::tenant_groups::Column::Id"
    )]
    TenantGroup,
}

impl Related<super::tenant_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TenantGroup.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert && self.created_at.is_not_set() {
            self.created_at = Set(now);
        }
        self.updated_at = Set(now);

        Ok(self)
    }
}
