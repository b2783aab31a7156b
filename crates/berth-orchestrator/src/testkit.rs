//! Shared test fixture: the full orchestrator object graph on top of an
//! in-memory registry database and the fake container runtime. Tests get
//! the same wiring the server uses, minus Docker and wall-clock timers.

use std::sync::Arc;

use berth_core::OrchestratorSettings;
use berth_database::test_utils::setup_test_db;
use berth_ports::PortAllocator;
use berth_registry::TenantRegistry;
use berth_runtime::test_utils::FakeRuntime;
use berth_runtime::ContainerRuntime;

use crate::lifecycle::LifecycleManager;
use crate::monitor::HealthMonitor;

pub(crate) struct TestStack {
    pub lifecycle: Arc<LifecycleManager>,
    pub monitor: HealthMonitor,
    pub registry: Arc<TenantRegistry>,
    pub runtime: Arc<FakeRuntime>,
    pub allocator: Arc<PortAllocator>,
    pub settings: Arc<OrchestratorSettings>,
}

pub(crate) async fn stack() -> TestStack {
    stack_with(|_| {}).await
}

/// Build a stack after tweaking the default settings. The backoff is
/// shortened up front so retry-path tests do not sleep for real; the
/// closure can still override it.
pub(crate) async fn stack_with(configure: impl FnOnce(&mut OrchestratorSettings)) -> TestStack {
    let mut settings = OrchestratorSettings::default();
    settings.runtime_backoff_ms = 1;
    configure(&mut settings);
    let settings = Arc::new(settings);

    let db = setup_test_db().await.expect("in-memory database");
    let registry = Arc::new(TenantRegistry::new(db));
    let runtime = Arc::new(FakeRuntime::new());
    let allocator = Arc::new(PortAllocator::new(
        &settings.services,
        settings.port_quarantine_secs,
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        runtime.clone() as Arc<dyn ContainerRuntime>,
        allocator.clone(),
        settings.clone(),
    ));
    let monitor = HealthMonitor::new(
        registry.clone(),
        lifecycle.clone(),
        runtime.clone() as Arc<dyn ContainerRuntime>,
        allocator.clone(),
        settings.clone(),
    );

    TestStack {
        lifecycle,
        monitor,
        registry,
        runtime,
        allocator,
        settings,
    }
}
