//! Orchestrator plugin: wires the port allocator, tenant registry,
//! lifecycle manager and health monitor into the plugin system and exposes
//! the control-plane routes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use berth_core::plugin::{
    BerthPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use berth_core::OrchestratorSettings;
use berth_database::DbConnection;
use berth_ports::PortAllocator;
use berth_registry::TenantRegistry;
use berth_runtime::ContainerRuntime;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::AppState;
use crate::lifecycle::LifecycleManager;
use crate::monitor::HealthMonitor;

pub struct OrchestratorPlugin;

impl OrchestratorPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrchestratorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl BerthPlugin for OrchestratorPlugin {
    fn name(&self) -> &'static str {
        "orchestrator"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            let runtime = context.require_service::<dyn ContainerRuntime>();
            let settings = context.require_service::<OrchestratorSettings>();

            let registry = Arc::new(TenantRegistry::new(db));
            let allocator = Arc::new(PortAllocator::new(
                &settings.services,
                settings.port_quarantine_secs,
            ));

            // Warm-up: re-mark every persisted port assignment as reserved
            // so a restarted server never hands out a port a stored group
            // already owns.
            let assigned = registry.all_assigned_ports().await.map_err(|e| {
                PluginError::InitializationFailed(format!(
                    "Failed to load assigned ports from the registry: {e}"
                ))
            })?;
            let mut warmed = 0usize;
            for (kind, port) in assigned {
                match allocator.mark_reserved(kind, port) {
                    Ok(()) => warmed += 1,
                    // A stale row outside the configured range must not
                    // block boot; the monitor will reconcile the group.
                    Err(err) => tracing::warn!(
                        "Skipping stored {} port {} during allocator warm-up: {}",
                        kind,
                        port,
                        err
                    ),
                }
            }
            if warmed > 0 {
                tracing::info!("Re-reserved {} ports from stored tenant groups", warmed);
            }

            let lifecycle = Arc::new(LifecycleManager::new(
                registry.clone(),
                runtime.clone(),
                allocator.clone(),
                settings.clone(),
            ));
            let monitor = Arc::new(HealthMonitor::new(
                registry.clone(),
                lifecycle.clone(),
                runtime.clone(),
                allocator.clone(),
                settings.clone(),
            ));

            context.register_service(registry);
            context.register_service(allocator);
            context.register_service(lifecycle);
            context.register_service(monitor.clone());

            // Health monitoring runs for the life of the process.
            tokio::spawn(async move {
                tracing::debug!("Starting health monitor");
                monitor.start().await;
            });

            tracing::debug!("Orchestrator plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let app_state = Arc::new(AppState {
            lifecycle: context.require_service::<LifecycleManager>(),
            registry: context.require_service::<TenantRegistry>(),
            allocator: context.require_service::<PortAllocator>(),
            runtime: context.require_service::<dyn ContainerRuntime>(),
            settings: context.require_service::<OrchestratorSettings>(),
        });
        let routes = crate::handlers::configure_routes().with_state(app_state);
        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<crate::handlers::ApiDoc as OpenApiTrait>::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{PlanTier, ServiceKind};
    use berth_database::test_utils::setup_test_db;
    use berth_runtime::test_utils::FakeRuntime;

    #[tokio::test]
    async fn test_orchestrator_plugin_name() {
        let plugin = OrchestratorPlugin::new();
        assert_eq!(plugin.name(), "orchestrator");
    }

    #[tokio::test]
    async fn test_register_services_provides_full_stack() {
        let context = ServiceRegistrationContext::new();
        context.register_service(setup_test_db().await.unwrap());
        context.register_service::<dyn ContainerRuntime>(Arc::new(FakeRuntime::new()));
        context.register_service(Arc::new(OrchestratorSettings::default()));

        let plugin = OrchestratorPlugin::new();
        plugin.register_services(&context).await.unwrap();

        let plugin_context = context.create_plugin_context();
        assert!(plugin_context.get_service::<TenantRegistry>().is_some());
        assert!(plugin_context.get_service::<PortAllocator>().is_some());
        assert!(plugin_context.get_service::<LifecycleManager>().is_some());
        assert!(plugin_context.get_service::<HealthMonitor>().is_some());
        assert!(plugin.configure_routes(&plugin_context).is_some());
        assert!(plugin.openapi_schema().is_some());
    }

    #[tokio::test]
    async fn test_warm_up_reserves_stored_ports() {
        let context = ServiceRegistrationContext::new();
        let db = setup_test_db().await.unwrap();
        context.register_service(db.clone());
        context.register_service::<dyn ContainerRuntime>(Arc::new(FakeRuntime::new()));
        context.register_service(Arc::new(OrchestratorSettings::default()));

        // A group stored by a previous run of the server.
        let seeded = Arc::new(TenantRegistry::new(db));
        let mut group = berth_core::TenantContainerGroup {
            tenant_id: "acme".to_string(),
            plan_tier: PlanTier::Starter,
            state: berth_core::GroupState::Running,
            services: vec![berth_core::ServiceInstance::new(ServiceKind::Api, 8100)],
            created_at: chrono::Utc::now(),
            last_health_at: None,
            expires_at: None,
        };
        group.services[0].container_ref = Some("stale".to_string());
        seeded.upsert(&group).await.unwrap();

        let plugin = OrchestratorPlugin::new();
        plugin.register_services(&context).await.unwrap();

        let allocator = context
            .create_plugin_context()
            .require_service::<PortAllocator>();
        // 8100 is taken, so the next reservation moves past it.
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 8101);
    }
}
