//! Row-id range allocation against the meta service.
//!
//! Surrogate handles and auto-increment values come out of a per-table
//! high-water mark stored in the meta service. Reserving a range is a
//! compare-and-swap on that mark; losing a race means another writer took
//! the range first, so the allocator re-reads and retries with bounded,
//! jittered backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use caravel_common::constants::{
    MAX_ROW_ID_ALLOC_RETRIES, ROW_ID_ALLOC_BACKOFF_BASE_MS, ROW_ID_ALLOC_BACKOFF_CAP_MS,
};
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::types::{DatabaseId, Handle, TableId};

/// Outcome of a compare-and-swap on the row-id high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap took effect; the range is reserved.
    Swapped,
    /// Another writer moved the mark first; `actual` is its new value.
    Raced {
        /// The mark observed at swap time.
        actual: u64,
    },
}

/// Client for the meta service's row-id bookkeeping.
#[async_trait]
pub trait MetaClient: Send + Sync {
    /// Reads the current high-water mark for `(db, table)`.
    ///
    /// The mark is the first unreserved id; zero for a fresh table.
    async fn row_id_high_water(&self, db: DatabaseId, table: TableId) -> CaravelResult<u64>;

    /// Atomically advances the mark from `expect` to `next`.
    async fn cas_row_id_high_water(
        &self,
        db: DatabaseId,
        table: TableId,
        expect: u64,
        next: u64,
    ) -> CaravelResult<CasOutcome>;
}

/// Reserves contiguous row-id ranges.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use caravel_store::{MetaClient, RowIdAllocator};
/// # use caravel_common::types::{DatabaseId, TableId};
/// # async fn example(meta: Arc<dyn MetaClient>) -> caravel_common::CaravelResult<()> {
/// let allocator = RowIdAllocator::new(meta);
/// let base = allocator
///     .allocate(DatabaseId::new(1), TableId::new(2), 1_000, false)
///     .await?;
/// // Ids base, base+1, .., base+999 now belong to this writer alone.
/// # Ok(())
/// # }
/// ```
pub struct RowIdAllocator {
    meta: Arc<dyn MetaClient>,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl RowIdAllocator {
    /// Creates an allocator with the default retry policy.
    #[must_use]
    pub fn new(meta: Arc<dyn MetaClient>) -> Self {
        Self {
            meta,
            max_retries: MAX_ROW_ID_ALLOC_RETRIES,
            backoff_base_ms: ROW_ID_ALLOC_BACKOFF_BASE_MS,
        }
    }

    /// Overrides the maximum CAS attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reserves `[base, base + step)` and returns `base`.
    ///
    /// With `unsigned` the mark may use the full u64 range; the signed
    /// path refuses to cross `i64::MAX`. The returned handle carries the
    /// bit pattern either way.
    pub async fn allocate(
        &self,
        db: DatabaseId,
        table: TableId,
        step: u64,
        unsigned: bool,
    ) -> CaravelResult<Handle> {
        let mut current = self.meta.row_id_high_water(db, table).await?;

        for attempt in 0..self.max_retries {
            let next = current
                .checked_add(step)
                .filter(|&n| unsigned || n <= i64::MAX as u64 + 1)
                .ok_or(CaravelError::AllocatorExhausted { current, step })?;

            match self
                .meta
                .cas_row_id_high_water(db, table, current, next)
                .await?
            {
                CasOutcome::Swapped => {
                    debug!(table = %table, base = current, step, "reserved row-id range");
                    return Ok(Handle::new(current as i64));
                }
                CasOutcome::Raced { actual } => {
                    debug!(table = %table, attempt, actual, "lost row-id race, retrying");
                    current = actual;
                    tokio::time::sleep(self.backoff_for(attempt)).await;
                }
            }
        }

        Err(CaravelError::AllocatorContention {
            attempts: self.max_retries,
        })
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_base_ms
            .saturating_mul(1 << attempt.min(16))
            .min(ROW_ID_ALLOC_BACKOFF_CAP_MS);
        let jitter = rand::thread_rng().gen_range(0..=base.max(1) / 2);
        Duration::from_millis(base + jitter)
    }
}
