//! In-memory container runtime for tests.
//!
//! Behaves like a real runtime (containers addressable by id or name,
//! idempotent removal, probe semantics) and can be scripted to fail specific
//! create calls or to go offline entirely.

use crate::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError, RuntimeInfo,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Error class a scripted failure should produce.
#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    Unavailable,
    InvalidSpec,
    Timeout,
}

impl FailureKind {
    fn to_error(self) -> RuntimeError {
        match self {
            FailureKind::Unavailable => RuntimeError::Unavailable("fake runtime offline".into()),
            FailureKind::InvalidSpec => {
                RuntimeError::InvalidSpec("fake runtime rejected spec".into())
            }
            FailureKind::Timeout => RuntimeError::Timeout(Duration::from_millis(10)),
        }
    }
}

struct FailurePlan {
    kind: FailureKind,
    remaining: u32,
}

struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    status: ContainerStatus,
    created_at: berth_core::UtcDateTime,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    create_failures: Mutex<HashMap<String, FailurePlan>>,
    offline: AtomicBool,
    create_calls: AtomicU32,
    restart_calls: AtomicU32,
    removed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` create calls whose container name contains
    /// `fragment`. Later calls succeed again.
    pub fn fail_creates_matching(&self, fragment: &str, kind: FailureKind, times: u32) {
        self.create_failures.lock().insert(
            fragment.to_string(),
            FailurePlan {
                kind,
                remaining: times,
            },
        );
    }

    /// When offline, every call returns [`RuntimeError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn restart_calls(&self) -> u32 {
        self.restart_calls.load(Ordering::SeqCst)
    }

    /// Container names passed to `remove` that actually existed, in removal
    /// order.
    pub fn removed_names(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container_status(&self, name: &str) -> Option<ContainerStatus> {
        self.containers.lock().get(name).map(|c| c.status)
    }

    pub fn host_port_of(&self, name: &str) -> Option<u16> {
        self.containers.lock().get(name).map(|c| c.spec.host_port)
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.containers.lock().get(name).map(|c| c.spec.clone())
    }

    /// Simulate a container crashing outside of Berth's control.
    pub fn halt_out_of_band(&self, name: &str) {
        if let Some(container) = self.containers.lock().get_mut(name) {
            container.status = ContainerStatus::Exited;
        }
    }

    /// Simulate a container being deleted outside of Berth's control.
    pub fn vanish_out_of_band(&self, name: &str) {
        self.containers.lock().remove(name);
    }

    fn check_online(&self) -> Result<(), RuntimeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("fake runtime offline".into()));
        }
        Ok(())
    }

    /// Containers are addressable by id or name, as with Docker.
    fn resolve_name(&self, container_ref: &str) -> Option<String> {
        let containers = self.containers.lock();
        if containers.contains_key(container_ref) {
            return Some(container_ref.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.id == container_ref)
            .map(|(name, _)| name.clone())
    }

    fn scripted_failure(&self, name: &str) -> Option<RuntimeError> {
        let mut failures = self.create_failures.lock();
        let fragment = failures
            .iter()
            .find(|(fragment, plan)| plan.remaining > 0 && name.contains(fragment.as_str()))
            .map(|(fragment, _)| fragment.clone())?;
        let plan = failures.get_mut(&fragment)?;
        plan.remaining -= 1;
        Some(plan.kind.to_error())
    }

    fn with_container<T>(
        &self,
        container_ref: &str,
        apply: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T, RuntimeError> {
        let name = self
            .resolve_name(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(&name)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        Ok(apply(container))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.check_online()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.scripted_failure(&spec.name) {
            return Err(err);
        }

        let id = format!("fake-{}", uuid::Uuid::new_v4());
        self.containers.lock().insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                status: ContainerStatus::Running,
                created_at: chrono::Utc::now(),
            },
        );
        Ok(id)
    }

    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.check_online()?;
        self.with_container(container_ref, |c| c.status = ContainerStatus::Running)
    }

    async fn stop(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.check_online()?;
        self.with_container(container_ref, |c| c.status = ContainerStatus::Stopped)
    }

    async fn restart(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.check_online()?;
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        self.with_container(container_ref, |c| c.status = ContainerStatus::Running)
    }

    async fn remove(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.check_online()?;
        if let Some(name) = self.resolve_name(container_ref) {
            self.containers.lock().remove(&name);
            self.removed.lock().push(name);
        }
        Ok(())
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerInfo, RuntimeError> {
        self.check_online()?;
        self.with_container(container_ref, |c| ContainerInfo {
            id: c.id.clone(),
            name: c.spec.name.clone(),
            image: c.spec.image.clone(),
            status: c.status,
            created_at: c.created_at,
            host_port: Some(c.spec.host_port),
        })
    }

    async fn probe(&self, container_ref: &str) -> Result<bool, RuntimeError> {
        self.check_online()?;
        match self.inspect(container_ref).await {
            Ok(info) => Ok(info.status.is_running()),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn info(&self) -> Result<RuntimeInfo, RuntimeError> {
        self.check_online()?;
        Ok(RuntimeInfo {
            runtime_type: "fake".to_string(),
            version: "0.0.0".to_string(),
            api_version: "0".to_string(),
            os: "linux".to_string(),
            containers: self.containers.lock().len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec::new(name, "berth/tenant-api:latest", 8100, 8080)
    }

    #[tokio::test]
    async fn test_fake_runtime_lifecycle_by_id() {
        let runtime = FakeRuntime::new();

        let id = runtime
            .create_and_start(&spec("berth-acme-api"))
            .await
            .unwrap();
        assert!(runtime.probe(&id).await.unwrap());

        runtime.stop(&id).await.unwrap();
        assert!(!runtime.probe(&id).await.unwrap());

        runtime.start(&id).await.unwrap();
        assert!(runtime.probe(&id).await.unwrap());

        runtime.remove(&id).await.unwrap();
        assert!(!runtime.probe(&id).await.unwrap());
        assert_eq!(runtime.removed_names(), vec!["berth-acme-api".to_string()]);

        // Removing again is fine, but is not recorded a second time.
        runtime.remove(&id).await.unwrap();
        assert_eq!(runtime.removed_names().len(), 1);
    }

    #[tokio::test]
    async fn test_containers_addressable_by_name() {
        let runtime = FakeRuntime::new();
        runtime
            .create_and_start(&spec("berth-acme-api"))
            .await
            .unwrap();

        let info = runtime.inspect("berth-acme-api").await.unwrap();
        assert_eq!(info.name, "berth-acme-api");
        assert_eq!(info.host_port, Some(8100));

        runtime.stop("berth-acme-api").await.unwrap();
        assert_eq!(
            runtime.container_status("berth-acme-api"),
            Some(ContainerStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn test_scripted_create_failures_are_consumed() {
        let runtime = FakeRuntime::new();
        runtime.fail_creates_matching("campaign", FailureKind::Unavailable, 1);

        let err = runtime
            .create_and_start(&spec("berth-acme-campaign"))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // The plan only covered one failure.
        runtime
            .create_and_start(&spec("berth-acme-campaign"))
            .await
            .unwrap();
        assert_eq!(runtime.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_runtime_fails_everything() {
        let runtime = FakeRuntime::new();
        runtime
            .create_and_start(&spec("berth-acme-api"))
            .await
            .unwrap();

        runtime.set_offline(true);
        assert!(runtime.probe("berth-acme-api").await.is_err());
        assert!(runtime.info().await.is_err());

        runtime.set_offline(false);
        assert!(runtime.probe("berth-acme-api").await.unwrap());
    }

    #[tokio::test]
    async fn test_out_of_band_halt_fails_probe() {
        let runtime = FakeRuntime::new();
        runtime
            .create_and_start(&spec("berth-acme-api"))
            .await
            .unwrap();

        runtime.halt_out_of_band("berth-acme-api");
        assert!(!runtime.probe("berth-acme-api").await.unwrap());
        assert_eq!(
            runtime.container_status("berth-acme-api"),
            Some(ContainerStatus::Exited)
        );
    }
}
