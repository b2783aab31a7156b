//! Berth Ports - host port allocation for tenant service containers
//!
//! Every service kind draws from its own disjoint port range behind its own
//! lock, so allocating an api port never contends with a gateway allocation.
//! Released ports sit in quarantine for a grace period before they become
//! reservable again; explicit tenant deletion skips the quarantine and
//! returns ports to the free pool directly.

mod allocator;

pub use allocator::{PortAllocator, PortUsage};

use berth_core::ServiceKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("No free {kind} ports left in {start}-{end}")]
    Exhausted {
        kind: ServiceKind,
        start: u16,
        end: u16,
    },

    #[error("Port {port} is outside the {kind} range")]
    OutOfRange { port: u16, kind: ServiceKind },

    #[error("Port {port} is not reserved for {kind}")]
    NotReserved { port: u16, kind: ServiceKind },

    #[error("Port {port} is already reserved for {kind}")]
    AlreadyReserved { port: u16, kind: ServiceKind },
}
