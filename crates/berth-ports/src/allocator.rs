use crate::PortError;
use berth_core::{PortRange, ServiceCatalog, ServiceKind, UtcDateTime};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use utoipa::ToSchema;

/// One service kind's slice of the port space.
///
/// Invariant: `free`, `reserved` and the quarantine keys partition the range;
/// a port is always in exactly one of the three.
struct PortPool {
    range: PortRange,
    free: BTreeSet<u16>,
    reserved: BTreeSet<u16>,
    /// port -> instant it becomes reclaimable
    quarantined: BTreeMap<u16, UtcDateTime>,
}

impl PortPool {
    fn new(range: PortRange) -> Self {
        Self {
            range,
            free: (range.start..=range.end).collect(),
            reserved: BTreeSet::new(),
            quarantined: BTreeMap::new(),
        }
    }
}

/// Point-in-time occupancy of one service kind's port range.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PortUsage {
    pub service_kind: ServiceKind,
    pub range_start: u16,
    pub range_end: u16,
    pub free: usize,
    pub reserved: usize,
    pub quarantined: usize,
}

pub struct PortAllocator {
    // Indexed by ServiceKind discriminant; built from ServiceKind::ALL so
    // every kind has a pool.
    pools: [Mutex<PortPool>; 4],
    quarantine: chrono::Duration,
}

impl PortAllocator {
    pub fn new(catalog: &ServiceCatalog, quarantine_secs: u64) -> Self {
        let pools = ServiceKind::ALL
            .map(|kind| Mutex::new(PortPool::new(catalog.template_for(kind).port_range)));
        Self {
            pools,
            quarantine: chrono::Duration::seconds(quarantine_secs as i64),
        }
    }

    fn pool(&self, kind: ServiceKind) -> &Mutex<PortPool> {
        &self.pools[kind as usize]
    }

    /// Reserve the lowest free port for `kind`.
    pub fn reserve(&self, kind: ServiceKind) -> Result<u16, PortError> {
        let mut pool = self.pool(kind).lock();
        let port = pool.free.pop_first().ok_or(PortError::Exhausted {
            kind,
            start: pool.range.start,
            end: pool.range.end,
        })?;
        pool.reserved.insert(port);
        debug!("Reserved {} port {}", kind, port);
        Ok(port)
    }

    /// Release a reserved port into quarantine. It becomes reservable again
    /// once [`PortAllocator::reclaim_due`] runs past the quarantine deadline.
    pub fn release(&self, kind: ServiceKind, port: u16, now: UtcDateTime) -> Result<(), PortError> {
        let mut pool = self.pool(kind).lock();
        if !pool.range.contains(port) {
            return Err(PortError::OutOfRange { port, kind });
        }
        if !pool.reserved.remove(&port) {
            return Err(PortError::NotReserved { port, kind });
        }
        let reclaim_at = now + self.quarantine;
        pool.quarantined.insert(port, reclaim_at);
        debug!("Quarantined {} port {} until {}", kind, port, reclaim_at);
        Ok(())
    }

    /// Return a port straight to the free pool, whether it is currently
    /// reserved or quarantined. Used for explicit tenant deletion and for
    /// ports that were reserved but never bound to a container.
    pub fn release_immediate(&self, kind: ServiceKind, port: u16) -> Result<(), PortError> {
        let mut pool = self.pool(kind).lock();
        if !pool.range.contains(port) {
            return Err(PortError::OutOfRange { port, kind });
        }
        if pool.reserved.remove(&port) || pool.quarantined.remove(&port).is_some() {
            pool.free.insert(port);
            debug!("Released {} port {} without quarantine", kind, port);
            Ok(())
        } else {
            Err(PortError::NotReserved { port, kind })
        }
    }

    /// Move every quarantined port whose deadline has passed back into the
    /// free pool. Returns the number of ports reclaimed.
    pub fn reclaim_due(&self, now: UtcDateTime) -> usize {
        let mut reclaimed = 0;
        for kind in ServiceKind::ALL {
            let mut pool = self.pool(kind).lock();
            let due: Vec<u16> = pool
                .quarantined
                .iter()
                .filter(|(_, reclaim_at)| **reclaim_at <= now)
                .map(|(port, _)| *port)
                .collect();
            for port in due {
                pool.quarantined.remove(&port);
                pool.free.insert(port);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!("Reclaimed {} quarantined ports", reclaimed);
        }
        reclaimed
    }

    /// Mark a port as reserved without going through [`PortAllocator::reserve`].
    /// Used at boot to rebuild allocator state from persisted assignments.
    pub fn mark_reserved(&self, kind: ServiceKind, port: u16) -> Result<(), PortError> {
        let mut pool = self.pool(kind).lock();
        if !pool.range.contains(port) {
            return Err(PortError::OutOfRange { port, kind });
        }
        if !pool.free.remove(&port) {
            return Err(PortError::AlreadyReserved { port, kind });
        }
        pool.reserved.insert(port);
        Ok(())
    }

    /// Occupancy snapshot across all service kinds.
    pub fn usage(&self) -> Vec<PortUsage> {
        ServiceKind::ALL
            .iter()
            .map(|&kind| {
                let pool = self.pool(kind).lock();
                PortUsage {
                    service_kind: kind,
                    range_start: pool.range.start,
                    range_end: pool.range.end,
                    free: pool.free.len(),
                    reserved: pool.reserved.len(),
                    quarantined: pool.quarantined.len(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tiny_catalog() -> ServiceCatalog {
        let mut catalog = ServiceCatalog::default();
        catalog.api.port_range = PortRange::new(9000, 9002);
        catalog.warmer.port_range = PortRange::new(9010, 9012);
        catalog.campaign.port_range = PortRange::new(9020, 9022);
        catalog.gateway.port_range = PortRange::new(9030, 9032);
        catalog
    }

    fn at(secs: i64) -> UtcDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_reserve_hands_out_lowest_free_port() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9000);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9001);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9002);
    }

    #[test]
    fn test_exhausted_range_is_an_error() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        for _ in 0..3 {
            allocator.reserve(ServiceKind::Api).unwrap();
        }
        let err = allocator.reserve(ServiceKind::Api).unwrap_err();
        assert!(matches!(
            err,
            PortError::Exhausted {
                kind: ServiceKind::Api,
                start: 9000,
                end: 9002,
            }
        ));
    }

    #[test]
    fn test_kinds_allocate_independently() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        for _ in 0..3 {
            allocator.reserve(ServiceKind::Api).unwrap();
        }
        // api is exhausted, the other pools are untouched
        assert!(allocator.reserve(ServiceKind::Api).is_err());
        assert_eq!(allocator.reserve(ServiceKind::Warmer).unwrap(), 9010);
        assert_eq!(allocator.reserve(ServiceKind::Gateway).unwrap(), 9030);
    }

    #[test]
    fn test_released_port_stays_quarantined_until_reclaimed() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release(ServiceKind::Api, port, at(0)).unwrap();

        // The quarantined port is skipped even though it is the lowest.
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9001);

        assert_eq!(allocator.reclaim_due(at(29)), 0);
        assert_eq!(allocator.reclaim_due(at(30)), 1);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), port);
    }

    #[test]
    fn test_release_immediate_skips_quarantine() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release_immediate(ServiceKind::Api, port).unwrap();
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), port);
    }

    #[test]
    fn test_release_immediate_pulls_port_out_of_quarantine() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release(ServiceKind::Api, port, at(0)).unwrap();

        // Deletion right after a rollback should still free the port now.
        allocator.release_immediate(ServiceKind::Api, port).unwrap();
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), port);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release(ServiceKind::Api, port, at(0)).unwrap();

        let err = allocator.release(ServiceKind::Api, port, at(0)).unwrap_err();
        assert!(matches!(err, PortError::NotReserved { .. }));
    }

    #[test]
    fn test_release_outside_range_is_rejected() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let err = allocator
            .release(ServiceKind::Api, 12345, at(0))
            .unwrap_err();
        assert!(matches!(err, PortError::OutOfRange { port: 12345, .. }));
    }

    #[test]
    fn test_mark_reserved_rebuilds_boot_state() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        allocator.mark_reserved(ServiceKind::Api, 9001).unwrap();

        // 9001 is skipped; marking it again is reported as a duplicate.
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9000);
        assert_eq!(allocator.reserve(ServiceKind::Api).unwrap(), 9002);
        assert!(matches!(
            allocator.mark_reserved(ServiceKind::Api, 9001),
            Err(PortError::AlreadyReserved { .. })
        ));
    }

    #[test]
    fn test_usage_snapshot_counts() {
        let allocator = PortAllocator::new(&tiny_catalog(), 30);
        let port = allocator.reserve(ServiceKind::Api).unwrap();
        allocator.reserve(ServiceKind::Api).unwrap();
        allocator.release(ServiceKind::Api, port, at(0)).unwrap();

        let usage = allocator.usage();
        let api = usage
            .iter()
            .find(|u| u.service_kind == ServiceKind::Api)
            .unwrap();
        assert_eq!(api.range_start, 9000);
        assert_eq!(api.range_end, 9002);
        assert_eq!(api.free, 1);
        assert_eq!(api.reserved, 1);
        assert_eq!(api.quarantined, 1);

        let warmer = usage
            .iter()
            .find(|u| u.service_kind == ServiceKind::Warmer)
            .unwrap();
        assert_eq!(warmer.free, 3);
    }

    #[test]
    fn test_concurrent_reserves_never_share_a_port() {
        let mut catalog = tiny_catalog();
        catalog.api.port_range = PortRange::new(9000, 9063);
        let allocator = PortAllocator::new(&catalog, 30);

        let mut handed_out = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut ports = Vec::new();
                        for _ in 0..8 {
                            ports.push(allocator.reserve(ServiceKind::Api).unwrap());
                        }
                        ports
                    })
                })
                .collect();
            for handle in handles {
                handed_out.extend(handle.join().unwrap());
            }
        });

        let unique: HashSet<u16> = handed_out.iter().copied().collect();
        assert_eq!(unique.len(), 64);
    }
}
