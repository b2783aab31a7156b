use std::collections::HashMap;
use std::sync::Arc;

use berth_core::problemdetails::Problem;
use berth_core::{error_builder, GroupState, ServiceInstance, ServiceKind, TenantContainerGroup, UtcDateTime};
use berth_database::DbConnection;
use berth_entities::{service_instances, tenant_groups};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use thiserror::Error;
use tracing::debug;

use crate::locks::{OperationGuard, OperationLockTable};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tenant {0} not found")]
    NotFound(String),

    #[error("A {operation} operation is already in progress for tenant {tenant_id}")]
    OperationInProgress {
        tenant_id: String,
        operation: String,
    },

    #[error("Database error: {reason}")]
    DatabaseError { reason: String },

    #[error("Corrupt tenant record: {0}")]
    Corrupt(String),
}

impl From<DbErr> for RegistryError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::RecordNotFound(msg) => RegistryError::NotFound(msg),
            _ => RegistryError::DatabaseError {
                reason: error.to_string(),
            },
        }
    }
}

impl From<RegistryError> for Problem {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(msg) => error_builder::not_found().detail(msg).build(),
            RegistryError::OperationInProgress { .. } => {
                error_builder::conflict().detail(error.to_string()).build()
            }
            RegistryError::DatabaseError { reason } => error_builder::internal_server_error()
                .detail(reason)
                .build(),
            RegistryError::Corrupt(msg) => {
                error_builder::internal_server_error().detail(msg).build()
            }
        }
    }
}

/// Durable store for tenant container groups, plus the in-process lock
/// table that serializes lifecycle operations per tenant.
pub struct TenantRegistry {
    db: Arc<DbConnection>,
    locks: OperationLockTable,
}

impl TenantRegistry {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self {
            db,
            locks: OperationLockTable::new(),
        }
    }

    /// Claim the tenant's operation slot for the duration of the returned
    /// guard. A concurrent operation maps to a conflict for the caller.
    pub fn begin_operation(
        &self,
        tenant_id: &str,
        operation: &'static str,
    ) -> Result<OperationGuard, RegistryError> {
        self.locks.try_begin(tenant_id, operation).map_err(|holder| {
            RegistryError::OperationInProgress {
                tenant_id: tenant_id.to_string(),
                operation: holder.to_string(),
            }
        })
    }

    /// Whether a lifecycle operation currently holds the tenant's slot.
    pub fn operation_in_flight(&self, tenant_id: &str) -> bool {
        self.locks.is_locked(tenant_id)
    }

    pub async fn get(&self, tenant_id: &str) -> Result<TenantContainerGroup, RegistryError> {
        self.try_get(tenant_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(tenant_id.to_string()))
    }

    pub async fn try_get(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantContainerGroup>, RegistryError> {
        let row = tenant_groups::Entity::find()
            .filter(tenant_groups::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let services = service_instances::Entity::find()
            .filter(service_instances::Column::GroupId.eq(row.id))
            .all(self.db.as_ref())
            .await?;

        Ok(Some(Self::to_domain(row, services)?))
    }

    /// Insert the group or bring the stored copy in line with it. Service
    /// rows are matched by kind; kinds no longer present are removed.
    pub async fn upsert(&self, group: &TenantContainerGroup) -> Result<(), RegistryError> {
        let txn = self.db.begin().await?;

        let existing = tenant_groups::Entity::find()
            .filter(tenant_groups::Column::TenantId.eq(&group.tenant_id))
            .one(&txn)
            .await?;

        let group_id = match existing {
            Some(model) => {
                let id = model.id;
                let mut active: tenant_groups::ActiveModel = model.into();
                active.plan_tier = Set(group.plan_tier.as_str().to_string());
                active.state = Set(group.state.as_str().to_string());
                active.last_health_at = Set(group.last_health_at);
                active.expires_at = Set(group.expires_at);
                active.update(&txn).await?;
                id
            }
            None => {
                let active = tenant_groups::ActiveModel {
                    tenant_id: Set(group.tenant_id.clone()),
                    plan_tier: Set(group.plan_tier.as_str().to_string()),
                    state: Set(group.state.as_str().to_string()),
                    created_at: Set(group.created_at),
                    last_health_at: Set(group.last_health_at),
                    expires_at: Set(group.expires_at),
                    ..Default::default()
                };
                active.insert(&txn).await?.id
            }
        };

        let mut stored_by_kind: HashMap<String, service_instances::Model> =
            service_instances::Entity::find()
                .filter(service_instances::Column::GroupId.eq(group_id))
                .all(&txn)
                .await?
                .into_iter()
                .map(|m| (m.service_kind.clone(), m))
                .collect();

        for svc in &group.services {
            match stored_by_kind.remove(svc.service_kind.as_str()) {
                Some(row) => {
                    let mut active: service_instances::ActiveModel = row.into();
                    active.container_ref = Set(svc.container_ref.clone());
                    active.assigned_port = Set(i32::from(svc.assigned_port));
                    active.health_status = Set(svc.health_status.as_str().to_string());
                    active.restart_count = Set(svc.restart_count);
                    active.consecutive_passes = Set(svc.consecutive_passes);
                    active.restart_window_start = Set(svc.restart_window_start);
                    active.update(&txn).await?;
                }
                None => {
                    let active = service_instances::ActiveModel {
                        group_id: Set(group_id),
                        service_kind: Set(svc.service_kind.as_str().to_string()),
                        container_ref: Set(svc.container_ref.clone()),
                        assigned_port: Set(i32::from(svc.assigned_port)),
                        health_status: Set(svc.health_status.as_str().to_string()),
                        restart_count: Set(svc.restart_count),
                        consecutive_passes: Set(svc.consecutive_passes),
                        restart_window_start: Set(svc.restart_window_start),
                        ..Default::default()
                    };
                    active.insert(&txn).await?;
                }
            }
        }

        // Kinds the domain group no longer carries (cleared by a provision
        // rollback) are dropped from storage too.
        for (_, row) in stored_by_kind {
            row.delete(&txn).await?;
        }

        txn.commit().await?;
        debug!("Upserted tenant group {}", group.tenant_id);
        Ok(())
    }

    /// List groups ordered by creation time, optionally filtered by state.
    pub async fn list(
        &self,
        state: Option<GroupState>,
    ) -> Result<Vec<TenantContainerGroup>, RegistryError> {
        let mut query =
            tenant_groups::Entity::find().order_by_asc(tenant_groups::Column::CreatedAt);
        if let Some(state) = state {
            query = query.filter(tenant_groups::Column::State.eq(state.as_str()));
        }
        let rows = query.all(self.db.as_ref()).await?;
        self.attach_services(rows).await
    }

    /// Groups whose expiry deadline has passed.
    pub async fn expired(
        &self,
        now: UtcDateTime,
    ) -> Result<Vec<TenantContainerGroup>, RegistryError> {
        let rows = tenant_groups::Entity::find()
            .filter(tenant_groups::Column::ExpiresAt.is_not_null())
            .filter(tenant_groups::Column::ExpiresAt.lte(now))
            .order_by_asc(tenant_groups::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        self.attach_services(rows).await
    }

    /// Remove the tenant's rows. Deleting an absent tenant is an error so
    /// the API can answer 404 instead of silently succeeding.
    pub async fn delete(&self, tenant_id: &str) -> Result<(), RegistryError> {
        let txn = self.db.begin().await?;

        let Some(row) = tenant_groups::Entity::find()
            .filter(tenant_groups::Column::TenantId.eq(tenant_id))
            .one(&txn)
            .await?
        else {
            return Err(RegistryError::NotFound(tenant_id.to_string()));
        };

        service_instances::Entity::delete_many()
            .filter(service_instances::Column::GroupId.eq(row.id))
            .exec(&txn)
            .await?;
        tenant_groups::Entity::delete_by_id(row.id).exec(&txn).await?;

        txn.commit().await?;
        debug!("Deleted tenant group {}", tenant_id);
        Ok(())
    }

    /// Every (kind, port) assignment on record; used to rebuild the port
    /// allocator at boot.
    pub async fn all_assigned_ports(&self) -> Result<Vec<(ServiceKind, u16)>, RegistryError> {
        let rows = service_instances::Entity::find()
            .all(self.db.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| {
                let kind = row
                    .service_kind
                    .parse::<ServiceKind>()
                    .map_err(RegistryError::Corrupt)?;
                let port = u16::try_from(row.assigned_port).map_err(|_| {
                    RegistryError::Corrupt(format!(
                        "assigned port {} out of range",
                        row.assigned_port
                    ))
                })?;
                Ok((kind, port))
            })
            .collect()
    }

    async fn attach_services(
        &self,
        rows: Vec<tenant_groups::Model>,
    ) -> Result<Vec<TenantContainerGroup>, RegistryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let mut services_by_group: HashMap<i32, Vec<service_instances::Model>> = HashMap::new();
        for service in service_instances::Entity::find()
            .filter(service_instances::Column::GroupId.is_in(ids))
            .all(self.db.as_ref())
            .await?
        {
            services_by_group
                .entry(service.group_id)
                .or_default()
                .push(service);
        }

        rows.into_iter()
            .map(|row| {
                let services = services_by_group.remove(&row.id).unwrap_or_default();
                Self::to_domain(row, services)
            })
            .collect()
    }

    fn to_domain(
        row: tenant_groups::Model,
        service_rows: Vec<service_instances::Model>,
    ) -> Result<TenantContainerGroup, RegistryError> {
        let mut services = service_rows
            .into_iter()
            .map(|svc| {
                Ok(ServiceInstance {
                    service_kind: svc
                        .service_kind
                        .parse()
                        .map_err(RegistryError::Corrupt)?,
                    container_ref: svc.container_ref,
                    assigned_port: u16::try_from(svc.assigned_port).map_err(|_| {
                        RegistryError::Corrupt(format!(
                            "assigned port {} out of range",
                            svc.assigned_port
                        ))
                    })?,
                    health_status: svc
                        .health_status
                        .parse()
                        .map_err(RegistryError::Corrupt)?,
                    restart_count: svc.restart_count,
                    consecutive_passes: svc.consecutive_passes,
                    restart_window_start: svc.restart_window_start,
                })
            })
            .collect::<Result<Vec<ServiceInstance>, RegistryError>>()?;
        services.sort_by_key(|s| s.service_kind);

        Ok(TenantContainerGroup {
            tenant_id: row.tenant_id,
            plan_tier: row.plan_tier.parse().map_err(RegistryError::Corrupt)?,
            state: row.state.parse().map_err(RegistryError::Corrupt)?,
            services,
            created_at: row.created_at,
            last_health_at: row.last_health_at,
            expires_at: row.expires_at,
        })
    }
}
