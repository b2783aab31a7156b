//! Berth Runtime - container runtime abstraction for tenant services
//!
//! This crate provides a unified interface for:
//! - Creating and starting per-tenant service containers
//! - Managing container lifecycle (stop, restart, remove)
//! - Probing container liveness for the health monitor
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use utoipa::ToSchema;

use berth_core::UtcDateTime;

pub mod docker;
pub mod test_utils;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Invalid container spec: {0}")]
    InvalidSpec(String),

    #[error("Runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    /// Transient errors are worth retrying; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_) | RuntimeError::Timeout(_))
    }
}

/// Everything the runtime needs to create one tenant service container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub host_port: u16,
    pub container_port: u16,
    /// CPU cores
    pub cpu_limit: Option<f64>,
    pub memory_limit_mb: Option<u64>,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        host_port: u16,
        container_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            labels: HashMap::new(),
            host_port,
            container_port,
            cpu_limit: None,
            memory_limit_mb: None,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_resources(mut self, cpu_limit: Option<f64>, memory_limit_mb: Option<u64>) -> Self {
        self.cpu_limit = cpu_limit;
        self.memory_limit_mb = memory_limit_mb;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Exited,
    Dead,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub created_at: UtcDateTime,
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuntimeInfo {
    pub runtime_type: String,
    pub version: String,
    pub api_version: String,
    pub os: String,
    /// Containers the runtime currently manages on the configured network,
    /// stopped ones included.
    pub containers: u64,
}

/// Trait for creating and managing tenant service containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from a spec and start it, returning the container id
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a stopped container
    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Stop a running container
    async fn stop(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Restart a container in place
    async fn restart(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Remove a container, tolerating one that is already gone
    async fn remove(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Get container information
    async fn inspect(&self, container_ref: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Liveness probe: Ok(true) when the container is running, Ok(false)
    /// when it is stopped or gone, Err only when the runtime itself fails
    async fn probe(&self, container_ref: &str) -> Result<bool, RuntimeError>;

    /// Get runtime information (engine version, API version, etc.)
    async fn info(&self) -> Result<RuntimeInfo, RuntimeError>;
}

/// Retry configuration for runtime calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub backoff: Duration,
    pub op_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
            op_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: backoff, 2*backoff, 4*backoff (capped at 2s)
    fn delay_for(&self, attempt: u32) -> Duration {
        const MAX_DELAY: Duration = Duration::from_secs(2);
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.backoff.saturating_mul(factor), MAX_DELAY)
    }
}

/// Run a runtime call with bounded retries for transient failures.
///
/// Non-transient errors (missing containers, rejected specs) are returned
/// immediately; only [`RuntimeError::is_transient`] errors are retried.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!("Waiting {:?} before retrying {}", delay, operation);
            sleep(delay).await;
        }

        let outcome = match timeout(policy.op_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(policy.op_timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_transient() || attempt >= policy.attempts {
                    return Err(err);
                }
                warn!(
                    "{} failed on attempt {}/{}: {}",
                    operation, attempt, policy.attempts, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(1),
            op_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(RuntimeError::Unavailable("down".to_string()).is_transient());
        assert!(RuntimeError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!RuntimeError::NotFound("c1".to_string()).is_transient());
        assert!(!RuntimeError::InvalidSpec("bad image".to_string()).is_transient());
        assert!(!RuntimeError::Other("weird".to_string()).is_transient());
    }

    #[test]
    fn test_container_spec_builders() {
        let spec = ContainerSpec::new("berth-acme-api", "berth/tenant-api:latest", 8100, 8080)
            .with_env(vec![("PORT".to_string(), "8080".to_string())])
            .with_label("berth.tenant", "acme")
            .with_resources(Some(0.5), Some(512));

        assert_eq!(spec.name, "berth-acme-api");
        assert_eq!(spec.host_port, 8100);
        assert_eq!(spec.container_port, 8080);
        assert_eq!(spec.env[0].1, "8080");
        assert_eq!(spec.labels.get("berth.tenant").unwrap(), "acme");
        assert_eq!(spec.cpu_limit, Some(0.5));
        assert_eq!(spec.memory_limit_mb, Some(512));
    }

    #[test]
    fn test_container_status_display() {
        assert_eq!(ContainerStatus::Created.to_string(), "created");
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Paused.to_string(), "paused");
        assert_eq!(ContainerStatus::Stopped.to_string(), "stopped");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
        assert_eq!(ContainerStatus::Dead.to_string(), "dead");
    }

    #[test]
    fn test_only_running_counts_as_running() {
        assert!(ContainerStatus::Running.is_running());
        assert!(!ContainerStatus::Created.is_running());
        assert!(!ContainerStatus::Exited.is_running());
        assert!(!ContainerStatus::Paused.is_running());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(200),
            op_timeout: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "create container", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RuntimeError::Unavailable("connection refused".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "create container", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::Unavailable("still down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(RuntimeError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_invalid_spec() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "create container", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::InvalidSpec("no such image".to_string()))
        })
        .await;

        assert!(matches!(result, Err(RuntimeError::InvalidSpec(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_times_out_slow_calls() {
        let policy = RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
            op_timeout: Duration::from_millis(10),
        };
        let result: Result<(), _> = with_retry(&policy, "inspect container", || async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(RuntimeError::Timeout(_))));
    }
}
