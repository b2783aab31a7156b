//! Docker implementation of the ContainerRuntime trait

use crate::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError, RuntimeInfo,
};
use async_trait::async_trait;
use bollard::{
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    Docker,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DockerRuntime {
    docker: Arc<Docker>,
    network_name: String,
}

/// Map a bollard error onto the runtime error taxonomy.
///
/// Transport-level failures mean the daemon is unreachable, which is the
/// transient class callers are allowed to retry.
fn classify(operation: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound(message),
            400 | 422 => RuntimeError::InvalidSpec(message),
            code if code >= 500 => RuntimeError::Unavailable(format!("{operation}: {message}")),
            _ => RuntimeError::Other(format!("{operation}: {message}")),
        },
        other => RuntimeError::Unavailable(format!("{operation}: {other}")),
    }
}

impl DockerRuntime {
    pub fn new(docker: Arc<Docker>, network_name: String) -> Self {
        Self {
            docker,
            network_name,
        }
    }

    pub async fn ensure_network_exists(&self) -> Result<(), RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<bollard::query_parameters::ListNetworksOptions>)
            .await
            .map_err(|e| classify("list networks", e))?;

        let network_exists = networks
            .iter()
            .any(|network| network.name.as_ref() == Some(&self.network_name));

        if !network_exists {
            info!("Creating network: {}", self.network_name);
            let create_options = bollard::models::NetworkCreateRequest {
                name: self.network_name.clone(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            };

            self.docker
                .create_network(create_options)
                .await
                .map_err(|e| classify("create network", e))?;
        }

        Ok(())
    }

    fn map_container_status(status: &str) -> ContainerStatus {
        match status {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Running,
            "removing" => ContainerStatus::Stopped,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Stopped,
        }
    }

    fn container_body(
        spec: &ContainerSpec,
        network_name: &str,
    ) -> bollard::models::ContainerCreateBody {
        let container_port_key = format!("{}/tcp", spec.container_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port_key.clone(),
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port_key, HashMap::new());

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some(network_name.to_string()),
            // Restart decisions belong to the health monitor, not the daemon.
            restart_policy: Some(bollard::models::RestartPolicy {
                name: Some(bollard::models::RestartPolicyNameEnum::NO),
                ..Default::default()
            }),
            memory: spec.memory_limit_mb.map(|mb| mb as i64 * 1024 * 1024),
            nano_cpus: spec.cpu_limit.map(|cores| (cores * 1_000_000_000.0) as i64),
            ..Default::default()
        };

        bollard::models::ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(
                spec.env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Find a container by its name
    /// Returns the container ID if found, or None if not found
    async fn find_container_by_name(
        &self,
        container_name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![container_name.to_string()]);

        let options = Some(ListContainersOptions {
            all: true, // Include stopped containers
            filters: Some(filters),
            ..Default::default()
        });

        let containers = self
            .docker
            .list_containers(options)
            .await
            .map_err(|e| classify("list containers", e))?;

        // Docker prefixes container names with "/" and the name filter is a
        // substring match, so re-check for an exact hit.
        for container in containers {
            if let Some(ref names) = container.names {
                for name in names {
                    let clean_name = name.trim_start_matches('/');
                    if clean_name == container_name {
                        return Ok(container.id.clone());
                    }
                }
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        info!("Creating container {} from image {}", spec.name, spec.image);

        self.ensure_network_exists().await?;

        // A stale container with this name blocks creation; remove it first.
        match self.find_container_by_name(&spec.name).await {
            Ok(Some(existing_id)) => {
                info!(
                    "Container {} already exists ({}), removing it before recreation",
                    spec.name, existing_id
                );
                if let Err(e) = self.stop(&existing_id).await {
                    warn!("Failed to stop existing container {}: {}", existing_id, e);
                }
                self.remove(&existing_id).await?;
            }
            Ok(None) => {
                debug!("No existing container with name {}", spec.name);
            }
            Err(e) => {
                warn!("Error checking for existing container: {}", e);
            }
        }

        let body = Self::container_body(spec, &self.network_name);

        let container = self
            .docker
            .create_container(
                Some(
                    CreateContainerOptionsBuilder::new()
                        .name(&spec.name)
                        .build(),
                ),
                body,
            )
            .await
            .map_err(|err| match err {
                // 404 on create means the image does not exist; that is a
                // spec problem, not a missing container.
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => RuntimeError::InvalidSpec(message),
                other => classify("create container", other),
            })?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| classify("start container", e))?;

        Ok(container.id)
    }

    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(container_ref, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already running
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(classify("start container", err)),
        }
    }

    async fn stop(&self, container_ref: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(container_ref, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(classify("stop container", err)),
        }
    }

    async fn restart(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.docker
            .restart_container(container_ref, None::<RestartContainerOptions>)
            .await
            .map_err(|e| classify("restart container", e))
    }

    async fn remove(&self, container_ref: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_container(
                container_ref,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already gone", container_ref);
                Ok(())
            }
            Err(err) => Err(classify("remove container", err)),
        }
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerInfo, RuntimeError> {
        let container = self
            .docker
            .inspect_container(container_ref, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify("inspect container", e))?;

        let state = container.state.unwrap_or_default();
        let config = container.config.unwrap_or_default();

        let host_port = container
            .network_settings
            .and_then(|ns| ns.ports)
            .unwrap_or_default()
            .into_iter()
            .find_map(|(_, bindings)| bindings?.first()?.host_port.as_ref()?.parse().ok());

        Ok(ContainerInfo {
            id: container.id.unwrap_or_default(),
            name: container
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.image.unwrap_or_default(),
            status: Self::map_container_status(
                &state.status.map(|s| s.to_string()).unwrap_or_default(),
            ),
            created_at: container.created.unwrap_or_else(chrono::Utc::now),
            host_port,
        })
    }

    async fn probe(&self, container_ref: &str) -> Result<bool, RuntimeError> {
        match self.inspect(container_ref).await {
            Ok(info) => Ok(info.status.is_running()),
            // A vanished container is a failed probe, not a runtime fault.
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn info(&self) -> Result<RuntimeInfo, RuntimeError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| classify("engine version", e))?;

        let mut filters = HashMap::new();
        filters.insert("network".to_string(), vec![self.network_name.clone()]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(|e| classify("list containers", e))?;

        Ok(RuntimeInfo {
            runtime_type: "docker".to_string(),
            version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            os: version.os.unwrap_or_default(),
            containers: containers.len() as u64,
        })
    }
}

#[cfg(test)]
mod docker_tests {
    use super::*;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec::new("berth-acme-api", "berth/tenant-api:latest", 8123, 8080)
            .with_env(vec![("PORT".to_string(), "8080".to_string())])
            .with_label("berth.tenant", "acme")
            .with_resources(Some(0.5), Some(512))
    }

    #[tokio::test]
    async fn test_docker_runtime_creation() {
        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                let runtime = DockerRuntime::new(Arc::new(docker), "berth-test".to_string());
                assert_eq!(runtime.network_name, "berth-test");
            }
            Err(e) => {
                println!("Docker not available (expected in some test environments): {e}");
            }
        }
    }

    #[test]
    fn test_container_body_port_bindings() {
        let body = DockerRuntime::container_body(&sample_spec(), "berth");

        let host_config = body.host_config.unwrap();
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings
            .get("8080/tcp")
            .and_then(|b| b.as_ref())
            .and_then(|v| v.first())
            .unwrap();

        assert_eq!(binding.host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(binding.host_port.as_deref(), Some("8123"));
        assert!(body.exposed_ports.unwrap().contains_key("8080/tcp"));
        assert_eq!(host_config.network_mode.as_deref(), Some("berth"));
    }

    #[test]
    fn test_container_body_resource_limits() {
        let body = DockerRuntime::container_body(&sample_spec(), "berth");
        let host_config = body.host_config.unwrap();

        assert_eq!(host_config.memory, Some(512 * 1024 * 1024));
        assert_eq!(host_config.nano_cpus, Some(500_000_000));
        assert_eq!(
            host_config.restart_policy.unwrap().name,
            Some(bollard::models::RestartPolicyNameEnum::NO)
        );
    }

    #[test]
    fn test_container_body_env_and_labels() {
        let body = DockerRuntime::container_body(&sample_spec(), "berth");

        assert_eq!(body.image.as_deref(), Some("berth/tenant-api:latest"));
        assert_eq!(body.env.unwrap(), vec!["PORT=8080".to_string()]);
        assert_eq!(
            body.labels.unwrap().get("berth.tenant").map(String::as_str),
            Some("acme")
        );
    }

    #[test]
    fn test_map_container_status() {
        assert_eq!(
            DockerRuntime::map_container_status("running"),
            ContainerStatus::Running
        );
        assert_eq!(
            DockerRuntime::map_container_status("restarting"),
            ContainerStatus::Running
        );
        assert_eq!(
            DockerRuntime::map_container_status("created"),
            ContainerStatus::Created
        );
        assert_eq!(
            DockerRuntime::map_container_status("exited"),
            ContainerStatus::Exited
        );
        assert_eq!(
            DockerRuntime::map_container_status("dead"),
            ContainerStatus::Dead
        );
        assert_eq!(
            DockerRuntime::map_container_status("gibberish"),
            ContainerStatus::Stopped
        );
    }

    #[test]
    fn test_classify_server_errors() {
        let not_found = classify(
            "inspect container",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "no such container".to_string(),
            },
        );
        assert!(matches!(not_found, RuntimeError::NotFound(_)));

        let invalid = classify(
            "create container",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 400,
                message: "invalid port".to_string(),
            },
        );
        assert!(matches!(invalid, RuntimeError::InvalidSpec(_)));

        let unavailable = classify(
            "create container",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "daemon on fire".to_string(),
            },
        );
        assert!(unavailable.is_transient());
    }
}
