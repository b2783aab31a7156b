//! Domain vocabulary shared by every Berth crate

use chrono::{DateTime as ChronoDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard UTC DateTime type used across all Berth crates
///
/// This is the canonical datetime type for API responses (serializes as
/// ISO 8601 with 'Z' suffix) and database timestamp columns.
///
/// # OpenAPI Schema
/// When using with utoipa, add the schema attribute:
/// ```rust
/// # use berth_core::UtcDateTime;
/// # use serde::Serialize;
/// # #[derive(Serialize, utoipa::ToSchema)]
/// # pub struct Response {
/// #[schema(value_type = String, format = DateTime)]
/// pub created_at: UtcDateTime,
/// # }
/// ```
pub type UtcDateTime = ChronoDateTime<Utc>;

/// The fixed service roles every tenant group provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Tenant-facing API process
    Api,
    /// Message-warmer worker
    Warmer,
    /// Campaign-runner worker
    Campaign,
    /// Messaging gateway
    Gateway,
}

impl ServiceKind {
    /// Provisioning order; also the order service maps render in.
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Api,
        ServiceKind::Warmer,
        ServiceKind::Campaign,
        ServiceKind::Gateway,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Api => "api",
            ServiceKind::Warmer => "warmer",
            ServiceKind::Campaign => "campaign",
            ServiceKind::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(ServiceKind::Api),
            "warmer" => Ok(ServiceKind::Warmer),
            "campaign" => Ok(ServiceKind::Campaign),
            "gateway" => Ok(ServiceKind::Gateway),
            other => Err(format!("unknown service kind: {other}")),
        }
    }
}

/// Subscription level governing resource limits and lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Hobby,
    Pro,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Hobby => "hobby",
            PlanTier::Pro => "pro",
            PlanTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "hobby" => Ok(PlanTier::Hobby),
            "pro" => Ok(PlanTier::Pro),
            "premium" => Ok(PlanTier::Premium),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

/// Lifecycle state of a tenant's container group.
///
/// `running` means every instance was healthy as of the last monitor cycle;
/// leaving `running` happens only through the health monitor or an explicit
/// lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Pending,
    Provisioning,
    Running,
    Degraded,
    Stopping,
    Stopped,
    Deleted,
    Failed,
}

impl GroupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupState::Pending => "pending",
            GroupState::Provisioning => "provisioning",
            GroupState::Running => "running",
            GroupState::Degraded => "degraded",
            GroupState::Stopping => "stopping",
            GroupState::Stopped => "stopped",
            GroupState::Deleted => "deleted",
            GroupState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GroupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GroupState::Pending),
            "provisioning" => Ok(GroupState::Provisioning),
            "running" => Ok(GroupState::Running),
            "degraded" => Ok(GroupState::Degraded),
            "stopping" => Ok(GroupState::Stopping),
            "stopped" => Ok(GroupState::Stopped),
            "deleted" => Ok(GroupState::Deleted),
            "failed" => Ok(GroupState::Failed),
            other => Err(format!("unknown group state: {other}")),
        }
    }
}

/// Probe-derived health of a single service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// One provisioned container of a tenant group.
///
/// `container_ref` is owned by the lifecycle manager, `assigned_port` by the
/// port allocator; the health fields are mutated only by the health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceInstance {
    pub service_kind: ServiceKind,
    /// Runtime-assigned identifier; absent while provisioning or after the
    /// container has been torn down.
    pub container_ref: Option<String>,
    pub assigned_port: u16,
    pub health_status: HealthStatus,
    /// Automatic restarts performed inside the current cooldown window.
    pub restart_count: i32,
    /// Consecutive successful probes since the last failure or restart.
    pub consecutive_passes: i32,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub restart_window_start: Option<UtcDateTime>,
}

impl ServiceInstance {
    /// Fresh instance on a newly reserved port, health not yet observed.
    pub fn new(service_kind: ServiceKind, assigned_port: u16) -> Self {
        Self {
            service_kind,
            container_ref: None,
            assigned_port,
            health_status: HealthStatus::Unknown,
            restart_count: 0,
            consecutive_passes: 0,
            restart_window_start: None,
        }
    }
}

/// One tenant's container group - the unit the orchestrator manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantContainerGroup {
    pub tenant_id: String,
    pub plan_tier: PlanTier,
    pub state: GroupState,
    /// One instance per service kind, ordered by [`ServiceKind::ALL`].
    pub services: Vec<ServiceInstance>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_health_at: Option<UtcDateTime>,
    /// Set for plan tiers with a bounded lifetime (free tier by default).
    #[schema(value_type = Option<String>, format = DateTime)]
    pub expires_at: Option<UtcDateTime>,
}

impl TenantContainerGroup {
    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceInstance> {
        self.services.iter().find(|s| s.service_kind == kind)
    }

    pub fn service_mut(&mut self, kind: ServiceKind) -> Option<&mut ServiceInstance> {
        self.services.iter_mut().find(|s| s.service_kind == kind)
    }

    pub fn all_healthy(&self) -> bool {
        !self.services.is_empty()
            && self
                .services
                .iter()
                .all(|s| s.health_status == HealthStatus::Healthy)
    }

    pub fn is_expired(&self, now: UtcDateTime) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_service_kind_serde_lowercase() {
        assert_eq!(serde_json::to_string(&ServiceKind::Api).unwrap(), r#""api""#);
        let kind: ServiceKind = serde_json::from_str(r#""gateway""#).unwrap();
        assert_eq!(kind, ServiceKind::Gateway);
    }

    #[test]
    fn test_service_kind_roundtrip_all() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_service_kind_order() {
        let names: Vec<&str> = ServiceKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["api", "warmer", "campaign", "gateway"]);
    }

    #[test]
    fn test_group_state_parse_rejects_unknown() {
        assert!("zombie".parse::<GroupState>().is_err());
        assert_eq!("degraded".parse::<GroupState>().unwrap(), GroupState::Degraded);
    }

    #[test]
    fn test_plan_tier_serde() {
        let tier: PlanTier = serde_json::from_str(r#""premium""#).unwrap();
        assert_eq!(tier, PlanTier::Premium);
        assert!(serde_json::from_str::<PlanTier>(r#""platinum""#).is_err());
    }

    #[test]
    fn test_group_all_healthy() {
        let mut group = TenantContainerGroup {
            tenant_id: "acme".to_string(),
            plan_tier: PlanTier::Pro,
            state: GroupState::Running,
            services: ServiceKind::ALL
                .iter()
                .map(|k| ServiceInstance::new(*k, 8100))
                .collect(),
            created_at: chrono::Utc::now(),
            last_health_at: None,
            expires_at: None,
        };
        assert!(!group.all_healthy());

        for svc in &mut group.services {
            svc.health_status = HealthStatus::Healthy;
        }
        assert!(group.all_healthy());

        group.service_mut(ServiceKind::Warmer).unwrap().health_status = HealthStatus::Unhealthy;
        assert!(!group.all_healthy());
    }

    #[test]
    fn test_group_expiry() {
        let now = chrono::Utc::now();
        let mut group = TenantContainerGroup {
            tenant_id: "t".to_string(),
            plan_tier: PlanTier::Free,
            state: GroupState::Running,
            services: vec![],
            created_at: now,
            last_health_at: None,
            expires_at: None,
        };
        assert!(!group.is_expired(now));

        group.expires_at = Some(now - Duration::seconds(1));
        assert!(group.is_expired(now));

        group.expires_at = Some(now + Duration::hours(1));
        assert!(!group.is_expired(now));
    }
}
