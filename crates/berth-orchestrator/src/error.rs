use berth_core::problemdetails::Problem;
use berth_core::{error_builder, ServiceKind};
use berth_ports::PortError;
use berth_registry::RegistryError;
use berth_runtime::RuntimeError;
use thiserror::Error;

/// Operation-level error taxonomy surfaced by the lifecycle manager and the
/// control API. Every variant maps to a machine-readable `error_code`.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Tenant {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Ports(#[from] PortError),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Invalid container spec: {0}")]
    InvalidSpec(String),

    #[error("Provisioning tenant {tenant_id} failed at the {failed_kind} service and was rolled back: {reason}")]
    PartialProvisionFailure {
        tenant_id: String,
        failed_kind: ServiceKind,
        reason: String,
    },

    #[error("Registry failure: {0}")]
    Registry(String),
}

impl From<RegistryError> for OrchestratorError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(tenant_id) => OrchestratorError::NotFound(tenant_id),
            RegistryError::OperationInProgress { .. } => {
                OrchestratorError::Conflict(error.to_string())
            }
            RegistryError::DatabaseError { reason } => OrchestratorError::Registry(reason),
            RegistryError::Corrupt(msg) => OrchestratorError::Registry(msg),
        }
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::InvalidSpec(msg) => OrchestratorError::InvalidSpec(msg),
            // A missing container outside an expected-removal path is an
            // upstream inconsistency, reported like any other runtime fault.
            other => OrchestratorError::RuntimeUnavailable(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for Problem {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::NotFound(_) => error_builder::not_found()
                .detail(error.to_string())
                .build(),
            OrchestratorError::Conflict(msg) => error_builder::conflict().detail(msg).build(),
            OrchestratorError::Ports(PortError::Exhausted { .. }) => {
                error_builder::service_unavailable()
                    .detail(error.to_string())
                    .value("error_code", "PORTS_EXHAUSTED")
                    .build()
            }
            OrchestratorError::Ports(other) => error_builder::internal_server_error()
                .detail(other.to_string())
                .build(),
            OrchestratorError::RuntimeUnavailable(msg) => error_builder::bad_gateway()
                .detail(msg)
                .value("error_code", "RUNTIME_UNAVAILABLE")
                .build(),
            OrchestratorError::InvalidSpec(msg) => {
                error_builder::unprocessable_entity().detail(msg).build()
            }
            OrchestratorError::PartialProvisionFailure { .. } => error_builder::bad_gateway()
                .detail(error.to_string())
                .value("error_code", "PARTIAL_PROVISION_FAILURE")
                .build(),
            OrchestratorError::Registry(msg) => {
                error_builder::internal_server_error().detail(msg).build()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn status_of(error: OrchestratorError) -> StatusCode {
        Problem::from(error).into_response().status()
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            status_of(OrchestratorError::NotFound("acme".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrchestratorError::Conflict("busy".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrchestratorError::Ports(PortError::Exhausted {
                kind: ServiceKind::Api,
                start: 8100,
                end: 8349,
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(OrchestratorError::RuntimeUnavailable("daemon down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(OrchestratorError::InvalidSpec("bad id".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(OrchestratorError::PartialProvisionFailure {
                tenant_id: "acme".into(),
                failed_kind: ServiceKind::Campaign,
                reason: "image missing".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(OrchestratorError::Registry("db gone".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_registry_conflict_surfaces_as_conflict() {
        let err = OrchestratorError::from(RegistryError::OperationInProgress {
            tenant_id: "acme".to_string(),
            operation: "provision".to_string(),
        });
        assert!(matches!(err, OrchestratorError::Conflict(_)));
        assert!(err.to_string().contains("provision"));
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err = OrchestratorError::from(RuntimeError::InvalidSpec("no such image".into()));
        assert!(matches!(err, OrchestratorError::InvalidSpec(_)));

        let err = OrchestratorError::from(RuntimeError::Unavailable("socket closed".into()));
        assert!(matches!(err, OrchestratorError::RuntimeUnavailable(_)));
    }
}
