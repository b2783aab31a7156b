//! Container lifecycle manager
//!
//! Owns the four tenant-facing operations (provision, stop, restart,
//! delete) and the rollback path that keeps partially provisioned groups
//! from ever being visible as `running`. All runtime calls go through
//! [`with_retry`] so transient daemon failures are absorbed up to the
//! configured attempt budget; rejected specs fail immediately.

use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    GroupState, HealthStatus, OrchestratorSettings, PlanTier, ServiceInstance, ServiceKind,
    TenantContainerGroup,
};
use berth_ports::PortAllocator;
use berth_registry::TenantRegistry;
use berth_runtime::{with_retry, ContainerRuntime, ContainerSpec, RetryPolicy, RuntimeError};
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;

/// Deterministic container name for a tenant's service.
pub fn container_name(tenant_id: &str, kind: ServiceKind) -> String {
    format!("berth-{tenant_id}-{kind}")
}

/// Tenant ids embed into container names, so they are held to Docker's
/// name charset: alphanumeric start, then alphanumeric plus `_.-`.
fn validate_tenant_id(tenant_id: &str) -> Result<(), OrchestratorError> {
    let starts_ok = tenant_id
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let rest_ok = tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !starts_ok || !rest_ok || tenant_id.len() > 63 {
        return Err(OrchestratorError::InvalidSpec(format!(
            "Tenant id '{tenant_id}' must start with an alphanumeric character, \
             contain only alphanumerics, '_', '.' or '-', and be at most 63 characters"
        )));
    }
    Ok(())
}

pub struct LifecycleManager {
    registry: Arc<TenantRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    allocator: Arc<PortAllocator>,
    settings: Arc<OrchestratorSettings>,
    retry: RetryPolicy,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<TenantRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        allocator: Arc<PortAllocator>,
        settings: Arc<OrchestratorSettings>,
    ) -> Self {
        let retry = RetryPolicy {
            attempts: settings.runtime_attempts,
            backoff: Duration::from_millis(settings.runtime_backoff_ms),
            op_timeout: Duration::from_secs(settings.runtime_call_timeout_secs),
        };
        Self {
            registry,
            runtime,
            allocator,
            settings,
            retry,
        }
    }

    /// Provision the full service group for a tenant.
    ///
    /// Idempotent: an existing non-failed group is returned unchanged. A
    /// `failed` group (left behind by a rolled-back attempt) is provisioned
    /// afresh on the same tenant id. On mid-flight failure every container
    /// created by this call is removed and every reserved port released
    /// before the error surfaces.
    pub async fn provision(
        &self,
        tenant_id: &str,
        plan_tier: PlanTier,
    ) -> Result<TenantContainerGroup, OrchestratorError> {
        validate_tenant_id(tenant_id)?;
        let _guard = self.registry.begin_operation(tenant_id, "provision")?;

        let previous = self.registry.try_get(tenant_id).await?;
        if let Some(existing) = previous {
            if existing.state != GroupState::Failed {
                debug!(
                    "Tenant {} already provisioned (state {}), returning existing group",
                    tenant_id, existing.state
                );
                return Ok(existing);
            }
            info!("Tenant {} is failed, retrying provisioning", tenant_id);
        }

        let mut services = Vec::with_capacity(ServiceKind::ALL.len());
        for kind in ServiceKind::ALL {
            match self.allocator.reserve(kind) {
                Ok(port) => services.push(ServiceInstance::new(kind, port)),
                Err(err) => {
                    // Nothing was bound yet; reservations go straight back.
                    for svc in &services {
                        if let Err(release_err) = self
                            .allocator
                            .release_immediate(svc.service_kind, svc.assigned_port)
                        {
                            warn!("Failed to release port during unwind: {}", release_err);
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let now = chrono::Utc::now();
        let ttl = self.settings.plans.policy_for(plan_tier).session_ttl_secs;
        let mut group = TenantContainerGroup {
            tenant_id: tenant_id.to_string(),
            plan_tier,
            state: GroupState::Provisioning,
            services,
            created_at: now,
            last_health_at: None,
            expires_at: ttl.map(|secs| now + chrono::Duration::seconds(secs as i64)),
        };
        self.registry.upsert(&group).await?;

        for i in 0..group.services.len() {
            let kind = group.services[i].service_kind;
            let spec = self.container_spec(tenant_id, plan_tier, kind, group.services[i].assigned_port);
            match with_retry(&self.retry, "create container", || {
                self.runtime.create_and_start(&spec)
            })
            .await
            {
                Ok(container_ref) => group.services[i].container_ref = Some(container_ref),
                Err(err) => {
                    warn!(
                        "Provisioning tenant {} failed at {}: {}; rolling back",
                        tenant_id, kind, err
                    );
                    self.rollback(&mut group).await;
                    return Err(OrchestratorError::PartialProvisionFailure {
                        tenant_id: tenant_id.to_string(),
                        failed_kind: kind,
                        reason: err.to_string(),
                    });
                }
            }
        }

        group.state = GroupState::Running;
        self.registry.upsert(&group).await?;
        info!(
            "Provisioned tenant {} ({} tier, {} services)",
            tenant_id,
            plan_tier,
            group.services.len()
        );
        Ok(group)
    }

    /// Stop every container in the group without destroying anything.
    /// Ports stay reserved so a later restart keeps the published URLs.
    pub async fn stop(&self, tenant_id: &str) -> Result<TenantContainerGroup, OrchestratorError> {
        let _guard = self.registry.begin_operation(tenant_id, "stop")?;
        let mut group = self.registry.get(tenant_id).await?;

        if group.state == GroupState::Stopped {
            return Ok(group);
        }
        if group.state == GroupState::Failed {
            return Err(OrchestratorError::Conflict(format!(
                "Tenant {tenant_id} has no provisioned services; provision it again or delete it"
            )));
        }

        group.state = GroupState::Stopping;
        self.registry.upsert(&group).await?;

        for svc in &mut group.services {
            if let Some(container_ref) = svc.container_ref.clone() {
                match with_retry(&self.retry, "stop container", || {
                    self.runtime.stop(&container_ref)
                })
                .await
                {
                    Ok(()) => {}
                    // Already gone; restart recreates it on the same port.
                    Err(RuntimeError::NotFound(_)) => {
                        debug!("Container {} vanished before stop", container_ref)
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            svc.health_status = HealthStatus::Unknown;
            svc.consecutive_passes = 0;
        }

        group.state = GroupState::Stopped;
        self.registry.upsert(&group).await?;
        info!("Stopped tenant {}", tenant_id);
        Ok(group)
    }

    /// Restart every service in place on its already-assigned port. A
    /// container the runtime no longer knows is recreated rather than
    /// failing the whole group.
    pub async fn restart(
        &self,
        tenant_id: &str,
    ) -> Result<TenantContainerGroup, OrchestratorError> {
        let _guard = self.registry.begin_operation(tenant_id, "restart")?;
        let mut group = self.registry.get(tenant_id).await?;

        if group.state == GroupState::Failed {
            return Err(OrchestratorError::Conflict(format!(
                "Tenant {tenant_id} has no provisioned services; provision it again or delete it"
            )));
        }

        group.state = GroupState::Provisioning;
        self.registry.upsert(&group).await?;

        let plan_tier = group.plan_tier;
        for i in 0..group.services.len() {
            self.revive_service(tenant_id, plan_tier, &mut group.services[i])
                .await?;
            let svc = &mut group.services[i];
            svc.health_status = HealthStatus::Unknown;
            svc.consecutive_passes = 0;
            // A manual restart hands the monitor a fresh auto-restart budget.
            svc.restart_count = 0;
            svc.restart_window_start = None;
        }

        group.state = GroupState::Running;
        self.registry.upsert(&group).await?;
        info!("Restarted tenant {}", tenant_id);
        Ok(group)
    }

    /// Destroy the group: remove containers, release ports immediately
    /// (the tenant explicitly relinquished them, so no quarantine), and
    /// drop the registry rows. Deleting an unknown or already-deleted
    /// tenant succeeds trivially.
    pub async fn delete(&self, tenant_id: &str) -> Result<(), OrchestratorError> {
        let _guard = self.registry.begin_operation(tenant_id, "delete")?;

        let Some(group) = self.registry.try_get(tenant_id).await? else {
            debug!("Tenant {} already deleted", tenant_id);
            return Ok(());
        };

        for svc in &group.services {
            if let Some(container_ref) = svc.container_ref.clone() {
                with_retry(&self.retry, "remove container", || {
                    self.runtime.remove(&container_ref)
                })
                .await?;
            }
        }

        // Removal succeeded for every container, so the ports cannot still
        // be bound; release without quarantine.
        for svc in &group.services {
            if let Err(err) = self
                .allocator
                .release_immediate(svc.service_kind, svc.assigned_port)
            {
                warn!("Failed to release port {}: {}", svc.assigned_port, err);
            }
        }

        self.registry.delete(tenant_id).await?;
        info!("Deleted tenant {}", tenant_id);
        Ok(())
    }

    /// Bring one service back: restart its container if the runtime still
    /// knows it, otherwise create a fresh one on the instance's existing
    /// port. Used by manual restart and by the health monitor.
    pub(crate) async fn revive_service(
        &self,
        tenant_id: &str,
        plan_tier: PlanTier,
        svc: &mut ServiceInstance,
    ) -> Result<(), OrchestratorError> {
        if let Some(container_ref) = svc.container_ref.clone() {
            match with_retry(&self.retry, "restart container", || {
                self.runtime.restart(&container_ref)
            })
            .await
            {
                Ok(()) => return Ok(()),
                Err(RuntimeError::NotFound(_)) => {
                    debug!(
                        "Container {} for tenant {} is gone, recreating",
                        container_ref, tenant_id
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        let spec = self.container_spec(tenant_id, plan_tier, svc.service_kind, svc.assigned_port);
        let container_ref = with_retry(&self.retry, "create container", || {
            self.runtime.create_and_start(&spec)
        })
        .await?;
        svc.container_ref = Some(container_ref);
        Ok(())
    }

    /// Undo a partial provision: remove whatever containers this attempt
    /// created, quarantine the ports they were bound to (the dying
    /// containers may still hold the sockets), and free never-bound ports
    /// immediately. The group is kept as a `failed` husk so the caller can
    /// see the outcome and retry.
    async fn rollback(&self, group: &mut TenantContainerGroup) {
        let now = chrono::Utc::now();
        for svc in &group.services {
            match &svc.container_ref {
                Some(container_ref) => {
                    if let Err(err) = self.runtime.remove(container_ref).await {
                        warn!("Rollback could not remove {}: {}", container_ref, err);
                    }
                    if let Err(err) =
                        self.allocator
                            .release(svc.service_kind, svc.assigned_port, now)
                    {
                        warn!("Rollback could not release port {}: {}", svc.assigned_port, err);
                    }
                }
                None => {
                    if let Err(err) = self
                        .allocator
                        .release_immediate(svc.service_kind, svc.assigned_port)
                    {
                        warn!("Rollback could not release port {}: {}", svc.assigned_port, err);
                    }
                }
            }
        }

        group.services.clear();
        group.state = GroupState::Failed;
        if let Err(err) = self.registry.upsert(group).await {
            tracing::error!(
                "Failed to persist rollback for tenant {}: {}",
                group.tenant_id,
                err
            );
        }
    }

    fn container_spec(
        &self,
        tenant_id: &str,
        plan_tier: PlanTier,
        kind: ServiceKind,
        host_port: u16,
    ) -> ContainerSpec {
        let template = self.settings.services.template_for(kind);
        let policy = self.settings.plans.policy_for(plan_tier);
        ContainerSpec::new(
            container_name(tenant_id, kind),
            &template.image,
            host_port,
            template.container_port,
        )
        .with_env(vec![
            ("BERTH_TENANT_ID".to_string(), tenant_id.to_string()),
            ("BERTH_SERVICE_KIND".to_string(), kind.to_string()),
            ("PORT".to_string(), template.container_port.to_string()),
        ])
        .with_label("sh.berth.managed", "true")
        .with_label("sh.berth.tenant", tenant_id)
        .with_label("sh.berth.service", kind.as_str())
        .with_resources(policy.cpu_limit, Some(policy.memory_limit_mb))
    }
}
