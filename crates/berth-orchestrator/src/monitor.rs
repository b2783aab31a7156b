//! Health monitor
//!
//! Periodically probes every running or degraded tenant group and
//! reconciles the registry with what the runtime actually reports: one
//! missed probe marks an instance unhealthy and degrades the group, a
//! budgeted auto-restart tries to bring the instance back, and a streak
//! of successful probes promotes it to healthy again. Expired groups are
//! deleted here, not by any API caller.

use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    GroupState, HealthStatus, OrchestratorSettings, TenantContainerGroup, UtcDateTime,
};
use berth_ports::PortAllocator;
use berth_registry::TenantRegistry;
use berth_runtime::ContainerRuntime;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::OrchestratorError;
use crate::lifecycle::LifecycleManager;

pub struct HealthMonitor {
    registry: Arc<TenantRegistry>,
    lifecycle: Arc<LifecycleManager>,
    runtime: Arc<dyn ContainerRuntime>,
    allocator: Arc<PortAllocator>,
    settings: Arc<OrchestratorSettings>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<TenantRegistry>,
        lifecycle: Arc<LifecycleManager>,
        runtime: Arc<dyn ContainerRuntime>,
        allocator: Arc<PortAllocator>,
        settings: Arc<OrchestratorSettings>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            runtime,
            allocator,
            settings,
        }
    }

    /// Run the monitor until the process shuts down (spawn in a tokio task).
    pub async fn start(&self) {
        info!(
            "Health monitor started (interval {}s)",
            self.settings.health_interval_secs
        );
        let interval = Duration::from_secs(self.settings.health_interval_secs);
        loop {
            sleep(interval).await;
            self.run_cycle(chrono::Utc::now()).await;
        }
    }

    /// One monitor tick. Takes the clock as an argument so tests can drive
    /// cycles without waiting on wall time.
    pub async fn run_cycle(&self, now: UtcDateTime) {
        let reclaimed = self.allocator.reclaim_due(now);
        if reclaimed > 0 {
            debug!("Reclaimed {} ports from quarantine", reclaimed);
        }

        if let Err(err) = self.sweep_expired(now).await {
            warn!("Expiry sweep failed: {}", err);
        }
        if let Err(err) = self.sweep_health(now).await {
            warn!("Health sweep failed: {}", err);
        }
    }

    /// Expiry is enforced centrally here: any group past `expires_at`
    /// (free-tier sessions by default) is deleted outright.
    async fn sweep_expired(&self, now: UtcDateTime) -> Result<(), OrchestratorError> {
        for group in self.registry.expired(now).await? {
            match self.lifecycle.delete(&group.tenant_id).await {
                Ok(()) => info!(
                    "Tenant {} ({} tier) passed its expiry and was deleted",
                    group.tenant_id, group.plan_tier
                ),
                Err(OrchestratorError::Conflict(_)) => debug!(
                    "Tenant {} has an operation in flight; expiry retried next cycle",
                    group.tenant_id
                ),
                Err(err) => warn!(
                    "Failed to delete expired tenant {}: {}",
                    group.tenant_id, err
                ),
            }
        }
        Ok(())
    }

    async fn sweep_health(&self, now: UtcDateTime) -> Result<(), OrchestratorError> {
        let mut candidates = self.registry.list(Some(GroupState::Running)).await?;
        candidates.extend(self.registry.list(Some(GroupState::Degraded)).await?);

        for candidate in candidates {
            let tenant_id = candidate.tenant_id;
            // Probing mutates health state, so it claims the tenant's
            // operation slot; a busy tenant is skipped, not contended.
            let Ok(_guard) = self.registry.begin_operation(&tenant_id, "health probe") else {
                debug!(
                    "Tenant {} has an operation in flight, skipping probe",
                    tenant_id
                );
                continue;
            };

            // Re-read under the guard; the listing snapshot may be stale.
            let Some(mut group) = self.registry.try_get(&tenant_id).await? else {
                continue;
            };
            if !matches!(group.state, GroupState::Running | GroupState::Degraded) {
                continue;
            }

            self.probe_group(&mut group, now).await;
        }
        Ok(())
    }

    async fn probe_group(&self, group: &mut TenantContainerGroup, now: UtcDateTime) {
        let initial_state = group.state;

        for index in 0..group.services.len() {
            let alive = match &group.services[index].container_ref {
                Some(container_ref) => match self.runtime.probe(container_ref).await {
                    Ok(alive) => alive,
                    Err(err) => {
                        // Runtime fault, not a container verdict: leave the
                        // group untouched and try again next cycle.
                        warn!(
                            "Probe for tenant {} failed: {}; skipping this cycle",
                            group.tenant_id, err
                        );
                        return;
                    }
                },
                // An instance with no container bound counts as a miss.
                None => false,
            };

            if alive {
                let streak = self.settings.healthy_probe_streak as i32;
                let svc = &mut group.services[index];
                svc.consecutive_passes = svc.consecutive_passes.saturating_add(1);
                if svc.health_status != HealthStatus::Healthy && svc.consecutive_passes >= streak {
                    info!(
                        "Tenant {} {} is healthy again after {} consecutive passes",
                        group.tenant_id, svc.service_kind, svc.consecutive_passes
                    );
                    svc.health_status = HealthStatus::Healthy;
                }
            } else {
                self.handle_missed_probe(group, index, now).await;
            }
        }

        if group.all_healthy() {
            group.state = GroupState::Running;
        } else if group
            .services
            .iter()
            .any(|s| s.health_status == HealthStatus::Unhealthy)
        {
            group.state = GroupState::Degraded;
        }
        if group.state != initial_state {
            info!(
                "Tenant {} transitioned {} -> {}",
                group.tenant_id, initial_state, group.state
            );
        }

        group.last_health_at = Some(now);
        if let Err(err) = self.registry.upsert(group).await {
            error!(
                "Failed to persist health for tenant {}: {}",
                group.tenant_id, err
            );
        }
    }

    async fn handle_missed_probe(
        &self,
        group: &mut TenantContainerGroup,
        index: usize,
        now: UtcDateTime,
    ) {
        let tenant_id = group.tenant_id.clone();
        let plan_tier = group.plan_tier;
        let svc = &mut group.services[index];

        if svc.health_status != HealthStatus::Unhealthy {
            warn!(
                "Tenant {} {} missed its liveness probe",
                tenant_id, svc.service_kind
            );
        }
        svc.health_status = HealthStatus::Unhealthy;
        svc.consecutive_passes = 0;

        // The restart budget lives inside a cooldown window; once the
        // window has fully elapsed the instance earns a fresh budget.
        let window = chrono::Duration::seconds(self.settings.restart_window_secs as i64);
        let window_elapsed = svc
            .restart_window_start
            .map(|start| now - start >= window)
            .unwrap_or(true);
        if window_elapsed {
            svc.restart_window_start = Some(now);
            svc.restart_count = 0;
        }

        if svc.restart_count >= self.settings.max_auto_restarts as i32 {
            debug!(
                "Tenant {} {} exhausted its restart budget ({}); left degraded for the operator",
                tenant_id, svc.service_kind, self.settings.max_auto_restarts
            );
            return;
        }

        match self.lifecycle.revive_service(&tenant_id, plan_tier, svc).await {
            Ok(()) => {
                svc.restart_count += 1;
                info!(
                    "Auto-restarted tenant {} {} ({}/{} in window)",
                    tenant_id, svc.service_kind, svc.restart_count, self.settings.max_auto_restarts
                );
            }
            Err(err) => warn!(
                "Auto-restart of tenant {} {} failed: {}",
                tenant_id, svc.service_kind, err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{stack, stack_with, TestStack};
    use berth_core::{PlanTier, ServiceKind};
    use berth_runtime::ContainerStatus;

    #[tokio::test]
    async fn test_probe_streak_promotes_group_to_healthy() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            ..
        } = stack().await;
        lifecycle.provision("acme", PlanTier::Starter).await.unwrap();

        let now = chrono::Utc::now();
        monitor.run_cycle(now).await;
        monitor.run_cycle(now).await;

        let group = registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Running);
        assert!(group
            .services
            .iter()
            .all(|s| s.health_status == HealthStatus::Unknown && s.consecutive_passes == 2));
        assert_eq!(group.last_health_at, Some(now));

        monitor.run_cycle(now).await;

        let group = registry.get("acme").await.unwrap();
        assert!(group.all_healthy());
        assert_eq!(group.state, GroupState::Running);
    }

    #[tokio::test]
    async fn test_missed_probe_degrades_and_auto_restarts() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            runtime,
            ..
        } = stack().await;
        lifecycle.provision("acme", PlanTier::Starter).await.unwrap();

        runtime.halt_out_of_band("berth-acme-api");
        monitor.run_cycle(chrono::Utc::now()).await;

        let group = registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Degraded);
        let api = group.service(ServiceKind::Api).unwrap();
        assert_eq!(api.health_status, HealthStatus::Unhealthy);
        assert_eq!(api.restart_count, 1);
        assert!(api.restart_window_start.is_some());
        assert_eq!(runtime.restart_calls(), 1);
        // The restart brought the container back up.
        assert_eq!(
            runtime.container_status("berth-acme-api"),
            Some(ContainerStatus::Running)
        );

        // Three consecutive passes after the restart return the instance
        // to healthy and the group to running.
        for _ in 0..3 {
            monitor.run_cycle(chrono::Utc::now()).await;
        }
        let group = registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Running);
        assert!(group.all_healthy());
    }

    #[tokio::test]
    async fn test_vanished_container_recreated_on_same_port() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            runtime,
            ..
        } = stack().await;
        let before = lifecycle.provision("acme", PlanTier::Starter).await.unwrap();
        let old_port = before.service(ServiceKind::Warmer).unwrap().assigned_port;
        let old_ref = before
            .service(ServiceKind::Warmer)
            .unwrap()
            .container_ref
            .clone();

        runtime.vanish_out_of_band("berth-acme-warmer");
        monitor.run_cycle(chrono::Utc::now()).await;

        let group = registry.get("acme").await.unwrap();
        let warmer = group.service(ServiceKind::Warmer).unwrap();
        assert_eq!(warmer.health_status, HealthStatus::Unhealthy);
        assert_eq!(warmer.restart_count, 1);
        assert_ne!(warmer.container_ref, old_ref);
        assert_eq!(warmer.assigned_port, old_port);
        assert_eq!(runtime.host_port_of("berth-acme-warmer"), Some(old_port));
        assert_eq!(runtime.create_calls(), 5);
    }

    #[tokio::test]
    async fn test_restart_budget_is_capped() {
        let stack = stack_with(|settings| settings.max_auto_restarts = 2).await;
        stack
            .lifecycle
            .provision("acme", PlanTier::Starter)
            .await
            .unwrap();

        // The container keeps dying right after every revival.
        for _ in 0..4 {
            stack.runtime.halt_out_of_band("berth-acme-api");
            stack.monitor.run_cycle(chrono::Utc::now()).await;
        }

        assert_eq!(stack.runtime.restart_calls(), 2, "budget of two restarts");
        let group = stack.registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Degraded);
        assert_eq!(group.service(ServiceKind::Api).unwrap().restart_count, 2);
        assert_eq!(
            stack.runtime.container_status("berth-acme-api"),
            Some(ContainerStatus::Exited)
        );
    }

    #[tokio::test]
    async fn test_restart_budget_resets_after_cooldown_window() {
        let stack = stack_with(|settings| {
            settings.max_auto_restarts = 1;
            settings.restart_window_secs = 600;
        })
        .await;
        stack
            .lifecycle
            .provision("acme", PlanTier::Starter)
            .await
            .unwrap();

        let t0 = chrono::Utc::now();

        stack.runtime.halt_out_of_band("berth-acme-api");
        stack.monitor.run_cycle(t0).await;
        assert_eq!(stack.runtime.restart_calls(), 1);

        // Still inside the window: budget spent, no further restart.
        stack.runtime.halt_out_of_band("berth-acme-api");
        stack
            .monitor
            .run_cycle(t0 + chrono::Duration::seconds(60))
            .await;
        assert_eq!(stack.runtime.restart_calls(), 1);

        // Window over: fresh budget.
        stack.runtime.halt_out_of_band("berth-acme-api");
        stack
            .monitor
            .run_cycle(t0 + chrono::Duration::seconds(601))
            .await;
        assert_eq!(stack.runtime.restart_calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_free_group_is_deleted() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            runtime,
            allocator,
            ..
        } = stack().await;
        lifecycle.provision("acme", PlanTier::Free).await.unwrap();
        lifecycle.provision("globex", PlanTier::Pro).await.unwrap();

        // Just before expiry nothing happens.
        monitor.run_cycle(chrono::Utc::now()).await;
        assert!(registry.try_get("acme").await.unwrap().is_some());

        monitor
            .run_cycle(chrono::Utc::now() + chrono::Duration::seconds(3601))
            .await;

        assert!(registry.try_get("acme").await.unwrap().is_none());
        assert!(!runtime
            .container_names()
            .iter()
            .any(|name| name.starts_with("berth-acme-")));
        // The paying tenant is untouched.
        assert!(registry.try_get("globex").await.unwrap().is_some());
        assert_eq!(runtime.container_names().len(), 4);
        assert!(allocator.usage().iter().all(|u| u.reserved == 1));
    }

    #[tokio::test]
    async fn test_monitor_skips_tenants_with_operations_in_flight() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            runtime,
            ..
        } = stack().await;
        lifecycle.provision("acme", PlanTier::Starter).await.unwrap();
        runtime.halt_out_of_band("berth-acme-api");

        let guard = registry.begin_operation("acme", "stop").unwrap();
        monitor.run_cycle(chrono::Utc::now()).await;

        // Nothing was probed or restarted while the operation held the slot.
        assert_eq!(runtime.restart_calls(), 0);
        let group = registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Running);
        assert!(group.last_health_at.is_none());

        drop(guard);
        monitor.run_cycle(chrono::Utc::now()).await;
        assert_eq!(runtime.restart_calls(), 1);
    }

    #[tokio::test]
    async fn test_runtime_fault_leaves_group_untouched() {
        let TestStack {
            lifecycle,
            monitor,
            registry,
            runtime,
            ..
        } = stack().await;
        lifecycle.provision("acme", PlanTier::Starter).await.unwrap();

        runtime.set_offline(true);
        monitor.run_cycle(chrono::Utc::now()).await;

        let group = registry.get("acme").await.unwrap();
        assert_eq!(group.state, GroupState::Running);
        assert!(group.last_health_at.is_none());
        assert!(group.services.iter().all(|s| s.consecutive_passes == 0));

        runtime.set_offline(false);
        monitor.run_cycle(chrono::Utc::now()).await;
        let group = registry.get("acme").await.unwrap();
        assert!(group.services.iter().all(|s| s.consecutive_passes == 1));
    }

    #[tokio::test]
    async fn test_cycle_reclaims_quarantined_ports() {
        let TestStack {
            monitor, allocator, ..
        } = stack().await;
        let t0 = chrono::Utc::now();
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release(ServiceKind::Api, port, t0).unwrap();

        // Quarantine (30s by default) still holds one second early.
        monitor
            .run_cycle(t0 + chrono::Duration::seconds(29))
            .await;
        let api = allocator
            .usage()
            .into_iter()
            .find(|u| u.service_kind == ServiceKind::Api)
            .unwrap();
        assert_eq!(api.quarantined, 1);

        monitor
            .run_cycle(t0 + chrono::Duration::seconds(30))
            .await;
        let api = allocator
            .usage()
            .into_iter()
            .find(|u| u.service_kind == ServiceKind::Api)
            .unwrap();
        assert_eq!(api.quarantined, 0);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), port);
    }
}
