//! Per-tenant operation serialization.
//!
//! A lifecycle operation holds a guard for its full duration; a second
//! operation arriving for the same tenant is rejected rather than queued,
//! so callers see an immediate conflict instead of a stalled request.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type InFlight = Arc<Mutex<HashMap<String, &'static str>>>;

#[derive(Default)]
pub struct OperationLockTable {
    in_flight: InFlight,
}

/// RAII lease on a tenant's operation slot. Dropping the guard frees the
/// tenant for the next operation, including on early returns and panics.
pub struct OperationGuard {
    tenant_id: String,
    in_flight: InFlight,
}

impl OperationLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the tenant's operation slot. On failure the returned error
    /// names the operation currently holding it.
    pub fn try_begin(
        &self,
        tenant_id: &str,
        operation: &'static str,
    ) -> Result<OperationGuard, &'static str> {
        let mut in_flight = self.in_flight.lock();
        if let Some(holder) = in_flight.get(tenant_id) {
            return Err(holder);
        }
        in_flight.insert(tenant_id.to_string(), operation);
        Ok(OperationGuard {
            tenant_id: tenant_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Name of the operation currently holding the tenant's slot, if any.
    pub fn holder(&self, tenant_id: &str) -> Option<&'static str> {
        self.in_flight.lock().get(tenant_id).copied()
    }

    pub fn is_locked(&self, tenant_id: &str) -> bool {
        self.in_flight.lock().contains_key(tenant_id)
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.tenant_id);
    }
}
