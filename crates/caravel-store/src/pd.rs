//! Placement driver client surface.
//!
//! The placement driver vends monotonic timestamps and knows which region
//! owns each slice of the keyspace. The coordinator holds exactly one PD
//! channel for the duration of a write.

use async_trait::async_trait;

use caravel_common::error::CaravelResult;
use caravel_common::types::{TableId, Timestamp};

use crate::region::RegionInfo;

/// Client for the placement driver.
#[async_trait]
pub trait PdClient: Send + Sync {
    /// Acquires the next timestamp from the oracle.
    ///
    /// Successive calls return strictly increasing timestamps; the driver
    /// relies on this for `commit_ts > start_ts`.
    async fn get_timestamp(&self) -> CaravelResult<Timestamp>;

    /// Returns the regions currently covering `table_id`'s keyspace,
    /// sorted by end key.
    ///
    /// Called once before partitioning and again after split hints, since
    /// splits change routing.
    async fn regions_for_table(&self, table_id: TableId) -> CaravelResult<Vec<RegionInfo>>;
}
