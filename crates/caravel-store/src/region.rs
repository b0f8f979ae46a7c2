//! Region model and key-to-partition routing.
//!
//! A region owns one contiguous keyspace range `[start_key, end_key)`; an
//! empty end key means unbounded. The router holds a table's region list
//! sorted by end key and routes each encoded key by binary search, then
//! folds regions into write partitions capped by the configured
//! concurrency.

use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::types::{Key, RegionId};

/// One region as reported by the placement driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region identifier.
    pub id: RegionId,
    /// Inclusive start of the owned range; empty means from the beginning.
    pub start_key: Key,
    /// Exclusive end of the owned range; empty means unbounded.
    pub end_key: Key,
}

impl RegionInfo {
    /// Creates a region descriptor.
    #[must_use]
    pub const fn new(id: RegionId, start_key: Key, end_key: Key) -> Self {
        Self {
            id,
            start_key,
            end_key,
        }
    }

    /// Returns true if `key` falls inside this region.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        (self.start_key.is_empty() || key >= &self.start_key)
            && (self.end_key.is_empty() || key < &self.end_key)
    }
}

/// Routes encoded keys to the region that owns them.
///
/// Ties are deterministic: routing is a pure function of the sorted region
/// list and the key bytes, so re-running the pipeline reproduces the same
/// partition for every pair.
#[derive(Debug, Clone)]
pub struct RegionRouter {
    /// Regions sorted by end key, unbounded region last.
    regions: Vec<RegionInfo>,
}

impl RegionRouter {
    /// Builds a router from a region list.
    ///
    /// The list is sorted by end key (unbounded last). An empty list is
    /// rejected; the caller always has at least one region per table.
    pub fn new(mut regions: Vec<RegionInfo>) -> CaravelResult<Self> {
        if regions.is_empty() {
            return Err(CaravelError::internal("region list is empty"));
        }
        regions.sort_by(|a, b| match (a.end_key.is_empty(), b.end_key.is_empty()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.end_key.cmp(&b.end_key),
        });
        Ok(Self { regions })
    }

    /// Number of regions.
    #[inline]
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Returns the regions in routing order.
    #[must_use]
    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    /// Replaces the region list, re-sorting it.
    ///
    /// Called after split hints are issued, since splits change routing.
    pub fn refresh(&mut self, regions: Vec<RegionInfo>) -> CaravelResult<()> {
        *self = Self::new(regions)?;
        Ok(())
    }

    /// Returns the index of the region owning `key`.
    ///
    /// Binary search for the first region whose end key is beyond `key`.
    pub fn route(&self, key: &Key) -> CaravelResult<usize> {
        let idx = self
            .regions
            .partition_point(|r| !r.end_key.is_empty() && &r.end_key <= key);
        let region = self.regions.get(idx).ok_or_else(|| {
            CaravelError::internal(format!("key {key} beyond region coverage"))
        })?;
        if !region.contains(key) {
            return Err(CaravelError::internal(format!(
                "region list has a gap at key {key}"
            )));
        }
        Ok(idx)
    }

    /// Folds a region index into a write-partition index.
    ///
    /// With `write_concurrency <= 0` every region is its own partition.
    #[inline]
    #[must_use]
    pub fn partition_index(&self, region_index: usize, write_concurrency: i32) -> usize {
        if write_concurrency <= 0 {
            region_index
        } else {
            region_index % write_concurrency as usize
        }
    }

    /// Number of write partitions under `write_concurrency`.
    #[inline]
    #[must_use]
    pub fn partition_count(&self, write_concurrency: i32) -> usize {
        if write_concurrency <= 0 {
            self.regions.len()
        } else {
            self.regions.len().min(write_concurrency as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> Key {
        Key::from_bytes(bytes)
    }

    fn three_regions() -> RegionRouter {
        RegionRouter::new(vec![
            RegionInfo::new(RegionId::new(3), key(b"m"), Key::empty()),
            RegionInfo::new(RegionId::new(1), Key::empty(), key(b"f")),
            RegionInfo::new(RegionId::new(2), key(b"f"), key(b"m")),
        ])
        .unwrap()
    }

    #[test]
    fn test_router_sorts_by_end_key() {
        let router = three_regions();
        assert_eq!(router.regions()[0].id, RegionId::new(1));
        assert_eq!(router.regions()[2].id, RegionId::new(3));
    }

    #[test]
    fn test_route_boundaries() {
        let router = three_regions();
        assert_eq!(router.route(&key(b"a")).unwrap(), 0);
        // End keys are exclusive: "f" belongs to the second region.
        assert_eq!(router.route(&key(b"f")).unwrap(), 1);
        assert_eq!(router.route(&key(b"g")).unwrap(), 1);
        assert_eq!(router.route(&key(b"m")).unwrap(), 2);
        assert_eq!(router.route(&key(b"zzz")).unwrap(), 2);
    }

    #[test]
    fn test_routed_region_contains_key() {
        let router = three_regions();
        for k in [&b"a"[..], b"f", b"lzz", b"m", b"x"] {
            let k = key(k);
            let idx = router.route(&k).unwrap();
            assert!(router.regions()[idx].contains(&k));
        }
    }

    #[test]
    fn test_partition_folding() {
        let router = three_regions();
        assert_eq!(router.partition_count(2), 2);
        assert_eq!(router.partition_index(0, 2), 0);
        assert_eq!(router.partition_index(1, 2), 1);
        assert_eq!(router.partition_index(2, 2), 0);

        // Non-positive concurrency: one partition per region.
        assert_eq!(router.partition_count(0), 3);
        assert_eq!(router.partition_index(2, 0), 2);
        assert_eq!(router.partition_index(2, -1), 2);
    }

    #[test]
    fn test_refresh_replaces_routing() {
        let mut router = three_regions();
        assert_eq!(router.region_count(), 3);
        router
            .refresh(vec![RegionInfo::new(RegionId::new(9), Key::empty(), Key::empty())])
            .unwrap();
        assert_eq!(router.region_count(), 1);
        assert_eq!(router.route(&key(b"zzz")).unwrap(), 0);
        assert!(router.refresh(Vec::new()).is_err());
    }

    #[test]
    fn test_gap_detected() {
        let router = RegionRouter::new(vec![
            RegionInfo::new(RegionId::new(1), Key::empty(), key(b"f")),
            RegionInfo::new(RegionId::new(2), key(b"h"), Key::empty()),
        ])
        .unwrap();
        assert!(router.route(&key(b"g")).is_err());
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(RegionRouter::new(Vec::new()).is_err());
    }
}
