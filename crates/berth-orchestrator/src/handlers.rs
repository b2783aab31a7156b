//! Control-plane HTTP surface
//!
//! Thin handlers over the lifecycle manager and the registry: validation
//! and state changes live in those components, this module only shapes
//! requests and responses. Errors surface as RFC 7807 problem+json with a
//! machine-readable `error_code`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use berth_core::problemdetails::Problem;
use berth_core::{
    error_builder, GroupState, HealthStatus, OrchestratorSettings, PlanTier, ServiceKind,
    TenantContainerGroup,
};
use berth_ports::{PortAllocator, PortUsage};
use berth_registry::TenantRegistry;
use berth_runtime::{ContainerRuntime, RuntimeInfo};

use crate::error::OrchestratorError;
use crate::lifecycle::LifecycleManager;

pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub registry: Arc<TenantRegistry>,
    pub allocator: Arc<PortAllocator>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub settings: Arc<OrchestratorSettings>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    /// Plan tier granted by the billing caller; taken as authoritative.
    pub plan_tier: PlanTier,
}

/// Routable endpoint of one provisioned service.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ServiceEndpoint {
    pub url: String,
    pub port: u16,
    pub health_status: HealthStatus,
    pub restart_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,
}

/// Full snapshot of a tenant's container group.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TenantGroupResponse {
    pub tenant_id: String,
    pub plan_tier: PlanTier,
    pub state: GroupState,
    /// Keyed by service kind (api, warmer, campaign, gateway).
    pub services: BTreeMap<ServiceKind, ServiceEndpoint>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl TenantGroupResponse {
    fn from_group(group: TenantContainerGroup, settings: &OrchestratorSettings) -> Self {
        let services = group
            .services
            .iter()
            .map(|svc| {
                (
                    svc.service_kind,
                    ServiceEndpoint {
                        url: settings.service_url(svc.assigned_port),
                        port: svc.assigned_port,
                        health_status: svc.health_status,
                        restart_count: svc.restart_count,
                        container_ref: svc.container_ref.clone(),
                    },
                )
            })
            .collect();

        Self {
            tenant_id: group.tenant_id,
            plan_tier: group.plan_tier,
            state: group.state,
            services,
            created_at: group.created_at.timestamp_millis(),
            last_health_at: group.last_health_at.map(|at| at.timestamp_millis()),
            expires_at: group.expires_at.map(|at| at.timestamp_millis()),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TenantStateResponse {
    pub tenant_id: String,
    pub state: GroupState,
}

#[derive(Deserialize)]
pub struct ListTenantsQuery {
    pub state: Option<GroupState>,
}

/// Lifecycle mutations must reach their final state (success, rollback or
/// failure) even when the caller disconnects mid-request, so they run on a
/// detached task rather than on the request future.
async fn run_to_completion<T, F>(operation: F) -> Result<T, Problem>
where
    T: Send + 'static,
    F: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(outcome) => outcome.map_err(Problem::from),
        Err(err) => Err(error_builder::internal_server_error()
            .detail(format!("Lifecycle task failed: {err}"))
            .build()),
    }
}

/// Provision the container group for a tenant
///
/// Idempotent: a tenant that already has a non-failed group gets it back
/// unchanged, with no new containers or reservations.
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/provision",
    tag = "Tenants",
    request_body = ProvisionRequest,
    responses(
        (status = 200, description = "Group provisioned (or already present)", body = TenantGroupResponse),
        (status = 409, description = "Another operation is in flight for this tenant"),
        (status = 422, description = "Invalid tenant id or plan tier"),
        (status = 502, description = "Container runtime failed; partial work was rolled back"),
        (status = 503, description = "A service port range is exhausted")
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier")
    )
)]
pub async fn provision_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, Problem> {
    let lifecycle = state.lifecycle.clone();
    let group =
        run_to_completion(async move { lifecycle.provision(&tenant_id, request.plan_tier).await })
            .await?;

    Ok(Json(TenantGroupResponse::from_group(
        group,
        &state.settings,
    )))
}

/// Stop a tenant's containers without destroying them
///
/// Ports stay reserved so a later restart serves the same URLs.
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/stop",
    tag = "Tenants",
    responses(
        (status = 200, description = "Group stopped", body = TenantStateResponse),
        (status = 404, description = "Unknown tenant"),
        (status = 409, description = "Another operation is in flight, or the group is failed"),
        (status = 502, description = "Container runtime failed")
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier")
    )
)]
pub async fn stop_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let lifecycle = state.lifecycle.clone();
    let group = run_to_completion(async move { lifecycle.stop(&tenant_id).await }).await?;

    Ok(Json(TenantStateResponse {
        tenant_id: group.tenant_id,
        state: group.state,
    }))
}

/// Restart a tenant's containers in place
///
/// Containers the runtime no longer knows are recreated on their already
/// assigned ports; everything else is restarted as-is.
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/restart",
    tag = "Tenants",
    responses(
        (status = 200, description = "Group restarted", body = TenantStateResponse),
        (status = 404, description = "Unknown tenant"),
        (status = 409, description = "Another operation is in flight, or the group is failed"),
        (status = 502, description = "Container runtime failed")
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier")
    )
)]
pub async fn restart_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let lifecycle = state.lifecycle.clone();
    let group = run_to_completion(async move { lifecycle.restart(&tenant_id).await }).await?;

    Ok(Json(TenantStateResponse {
        tenant_id: group.tenant_id,
        state: group.state,
    }))
}

/// Delete a tenant's group, containers and all
///
/// Ports are released immediately, bypassing quarantine. Deleting a tenant
/// that does not exist succeeds trivially, so retries are safe.
#[utoipa::path(
    delete,
    path = "/tenants/{tenant_id}",
    tag = "Tenants",
    responses(
        (status = 200, description = "Group deleted (or already gone)", body = TenantStateResponse),
        (status = 409, description = "Another operation is in flight for this tenant"),
        (status = 502, description = "Container runtime failed; nothing was released")
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier")
    )
)]
pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let lifecycle = state.lifecycle.clone();
    let id = tenant_id.clone();
    run_to_completion(async move { lifecycle.delete(&id).await }).await?;

    Ok(Json(TenantStateResponse {
        tenant_id,
        state: GroupState::Deleted,
    }))
}

/// Get the full snapshot of a tenant's group
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}",
    tag = "Tenants",
    responses(
        (status = 200, description = "Group snapshot", body = TenantGroupResponse),
        (status = 404, description = "Unknown tenant")
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier")
    )
)]
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let group = state
        .registry
        .get(&tenant_id)
        .await
        .map_err(OrchestratorError::from)?;

    Ok(Json(TenantGroupResponse::from_group(
        group,
        &state.settings,
    )))
}

/// List tenant groups, optionally filtered by state
#[utoipa::path(
    get,
    path = "/tenants",
    tag = "Tenants",
    responses(
        (status = 200, description = "Tenant groups ordered by creation time", body = Vec<TenantGroupResponse>)
    ),
    params(
        ("state" = Option<GroupState>, Query, description = "Only groups currently in this state")
    )
)]
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTenantsQuery>,
) -> Result<impl IntoResponse, Problem> {
    let groups = state
        .registry
        .list(query.state)
        .await
        .map_err(OrchestratorError::from)?;

    let response: Vec<TenantGroupResponse> = groups
        .into_iter()
        .map(|group| TenantGroupResponse::from_group(group, &state.settings))
        .collect();

    Ok(Json(response))
}

/// Container runtime version and managed container count
#[utoipa::path(
    get,
    path = "/system/runtime",
    tag = "System",
    responses(
        (status = 200, description = "Runtime engine information", body = RuntimeInfo),
        (status = 502, description = "Container runtime unreachable")
    )
)]
pub async fn get_runtime_info(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, Problem> {
    let info = state
        .runtime
        .info()
        .await
        .map_err(OrchestratorError::from)?;

    Ok(Json(info))
}

/// Port allocator occupancy per service kind
#[utoipa::path(
    get,
    path = "/system/ports",
    tag = "System",
    responses(
        (status = 200, description = "Free / reserved / quarantined counts per range", body = Vec<PortUsage>)
    )
)]
pub async fn get_port_usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.allocator.usage())
}

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tenants", get(list_tenants))
        .route("/tenants/{tenant_id}", get(get_tenant).delete(delete_tenant))
        .route("/tenants/{tenant_id}/provision", post(provision_tenant))
        .route("/tenants/{tenant_id}/stop", post(stop_tenant))
        .route("/tenants/{tenant_id}/restart", post(restart_tenant))
        .route("/system/runtime", get(get_runtime_info))
        .route("/system/ports", get(get_port_usage))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        provision_tenant,
        stop_tenant,
        restart_tenant,
        delete_tenant,
        get_tenant,
        list_tenants,
        get_runtime_info,
        get_port_usage,
    ),
    components(
        schemas(
            ProvisionRequest,
            ServiceEndpoint,
            TenantGroupResponse,
            TenantStateResponse,
            RuntimeInfo,
            PortUsage,
        )
    ),
    tags(
        (name = "Tenants", description = "Per-tenant container group lifecycle"),
        (name = "System", description = "Operator introspection")
    )
)]
pub struct ApiDoc;
