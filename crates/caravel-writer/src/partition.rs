//! Region-aware partitioning of the merged KV stream.
//!
//! Each pair is routed to the region owning its key, and regions are
//! folded into at most `write_concurrency` partitions. A first-value
//! reduce-by-key runs ahead of routing; the dedup and merge stages should
//! already have made keys unique, so any drop here is logged.

use std::collections::HashSet;

use tracing::warn;

use caravel_common::error::CaravelResult;
use caravel_common::types::KvPair;
use caravel_store::RegionRouter;

/// Buckets `pairs` into write partitions by owning region.
///
/// Returned buckets are positional: index `p` holds every pair routed to
/// partition `p`. Empty buckets stay in place so partition indices remain
/// stable.
pub fn partition_pairs(
    router: &RegionRouter,
    pairs: Vec<KvPair>,
    write_concurrency: i32,
) -> CaravelResult<Vec<Vec<KvPair>>> {
    let before = pairs.len();
    let mut seen = HashSet::with_capacity(pairs.len());
    let mut unique = pairs;
    unique.retain(|pair| seen.insert(pair.key.clone()));
    if unique.len() < before {
        warn!(
            dropped = before - unique.len(),
            "duplicate keys survived dedup; keeping first values"
        );
    }

    let mut buckets = vec![Vec::new(); router.partition_count(write_concurrency)];
    for pair in unique {
        let region = router.route(&pair.key)?;
        buckets[router.partition_index(region, write_concurrency)].push(pair);
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_common::types::{Key, RegionId, Value};
    use caravel_store::RegionInfo;

    fn pair(key: &[u8]) -> KvPair {
        KvPair::new(Key::from_bytes(key), Value::from_bytes(b"v"))
    }

    fn router() -> RegionRouter {
        RegionRouter::new(vec![
            RegionInfo::new(RegionId::new(1), Key::empty(), Key::from_bytes(b"f")),
            RegionInfo::new(RegionId::new(2), Key::from_bytes(b"f"), Key::from_bytes(b"m")),
            RegionInfo::new(RegionId::new(3), Key::from_bytes(b"m"), Key::empty()),
        ])
        .unwrap()
    }

    #[test]
    fn test_pairs_land_in_owning_region_partition() {
        let buckets =
            partition_pairs(&router(), vec![pair(b"a"), pair(b"g"), pair(b"z")], 0).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].len(), 1);
        assert_eq!(buckets[1].len(), 1);
        assert_eq!(buckets[2].len(), 1);
    }

    #[test]
    fn test_concurrency_folds_regions() {
        let buckets = partition_pairs(
            &router(),
            vec![pair(b"a"), pair(b"g"), pair(b"z")],
            2,
        )
        .unwrap();
        assert_eq!(buckets.len(), 2);
        // Regions 0 and 2 fold onto partition 0.
        assert_eq!(buckets[0].len(), 2);
        assert_eq!(buckets[1].len(), 1);
    }

    #[test]
    fn test_residual_duplicates_reduced_first_wins() {
        let mut dup = pair(b"a");
        dup.value = Value::from_bytes(b"second");
        let buckets = partition_pairs(&router(), vec![pair(b"a"), dup], 0).unwrap();
        assert_eq!(buckets[0].len(), 1);
        assert_eq!(buckets[0][0].value.as_bytes(), b"v");
    }

    #[test]
    fn test_empty_input_yields_empty_buckets() {
        let buckets = partition_pairs(&router(), Vec::new(), 2).unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(Vec::is_empty));
    }
}
