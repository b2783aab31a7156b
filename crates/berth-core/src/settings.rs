//! Orchestrator settings
//!
//! Plan-tier policy and per-service provisioning data live here as plain
//! configuration so operational changes (new tier limits, different port
//! ranges, image bumps) never require touching control flow.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{PlanTier, ServiceKind};

/// Inclusive interval of host ports a service kind allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Provisioning template for one service kind: which image to run, the port
/// the process listens on inside the container, and the host-port range its
/// instances are published from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceTemplate {
    pub image: String,
    pub container_port: u16,
    pub port_range: PortRange,
}

/// Per-service-kind provisioning data for the whole catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServiceCatalog {
    pub api: ServiceTemplate,
    pub warmer: ServiceTemplate,
    pub campaign: ServiceTemplate,
    pub gateway: ServiceTemplate,
}

impl ServiceCatalog {
    pub fn template_for(&self, kind: ServiceKind) -> &ServiceTemplate {
        match kind {
            ServiceKind::Api => &self.api,
            ServiceKind::Warmer => &self.warmer,
            ServiceKind::Campaign => &self.campaign,
            ServiceKind::Gateway => &self.gateway,
        }
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self {
            api: ServiceTemplate {
                image: "berth/tenant-api:latest".to_string(),
                container_port: 8080,
                port_range: PortRange::new(8100, 8349),
            },
            warmer: ServiceTemplate {
                image: "berth/tenant-warmer:latest".to_string(),
                container_port: 8080,
                port_range: PortRange::new(8350, 8599),
            },
            campaign: ServiceTemplate {
                image: "berth/tenant-campaign:latest".to_string(),
                container_port: 8080,
                port_range: PortRange::new(8600, 8849),
            },
            gateway: ServiceTemplate {
                image: "berth/tenant-gateway:latest".to_string(),
                container_port: 8090,
                port_range: PortRange::new(8850, 9099),
            },
        }
    }
}

/// Resource ceilings and lifetime policy for one plan tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlanPolicy {
    /// CPU ceiling in cores; None means unconstrained.
    pub cpu_limit: Option<f64>,
    pub memory_limit_mb: u64,
    /// Group lifetime from provisioning; None means the group persists
    /// until explicitly deleted.
    pub session_ttl_secs: Option<u64>,
}

/// Policy table covering every plan tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PlanPolicyTable {
    pub free: PlanPolicy,
    pub starter: PlanPolicy,
    pub hobby: PlanPolicy,
    pub pro: PlanPolicy,
    pub premium: PlanPolicy,
}

impl PlanPolicyTable {
    pub fn policy_for(&self, tier: PlanTier) -> &PlanPolicy {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Starter => &self.starter,
            PlanTier::Hobby => &self.hobby,
            PlanTier::Pro => &self.pro,
            PlanTier::Premium => &self.premium,
        }
    }
}

impl Default for PlanPolicyTable {
    fn default() -> Self {
        Self {
            free: PlanPolicy {
                cpu_limit: Some(0.5),
                memory_limit_mb: 512,
                session_ttl_secs: Some(3600),
            },
            starter: PlanPolicy {
                cpu_limit: Some(1.0),
                memory_limit_mb: 1024,
                session_ttl_secs: None,
            },
            hobby: PlanPolicy {
                cpu_limit: Some(1.0),
                memory_limit_mb: 2048,
                session_ttl_secs: None,
            },
            pro: PlanPolicy {
                cpu_limit: Some(2.0),
                memory_limit_mb: 4096,
                session_ttl_secs: None,
            },
            premium: PlanPolicy {
                cpu_limit: Some(4.0),
                memory_limit_mb: 8192,
                session_ttl_secs: None,
            },
        }
    }
}

/// Tunables for the orchestrator core.
/// All fields have sensible defaults for easy onboarding.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Scheme for published service URLs.
    pub public_scheme: String,
    /// Host for published service URLs; deployment targets swap this, not
    /// the code that builds URLs.
    pub public_host: String,

    // Health monitor
    pub health_interval_secs: u64,
    pub healthy_probe_streak: u32,
    pub max_auto_restarts: u32,
    pub restart_window_secs: u64,

    // Port allocator
    pub port_quarantine_secs: u64,

    // Container runtime calls
    pub runtime_attempts: u32,
    pub runtime_backoff_ms: u64,
    pub runtime_call_timeout_secs: u64,

    pub services: ServiceCatalog,
    pub plans: PlanPolicyTable,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            public_scheme: "http".to_string(),
            public_host: "127.0.0.1".to_string(),
            health_interval_secs: 30,
            healthy_probe_streak: 3,
            max_auto_restarts: 3,
            restart_window_secs: 600,
            port_quarantine_secs: 30,
            runtime_attempts: 3,
            runtime_backoff_ms: 200,
            runtime_call_timeout_secs: 30,
            services: ServiceCatalog::default(),
            plans: PlanPolicyTable::default(),
        }
    }
}

impl OrchestratorSettings {
    /// Routable URL for a published service port, computed from
    /// configuration rather than scattered string templates.
    pub fn service_url(&self, port: u16) -> String {
        format!("{}://{}:{}", self.public_scheme, self.public_host, port)
    }

    /// Create settings from a JSON value, using defaults for missing fields.
    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}
