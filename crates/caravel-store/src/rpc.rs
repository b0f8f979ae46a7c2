//! Transactional KV RPC surface.
//!
//! The store speaks percolator: a transaction prewrites a lock+data pair
//! for every key at `start_ts`, with one key designated primary and every
//! secondary lock pointing at it, then commits the primary and (lazily)
//! the secondaries at `commit_ts`. Readers resolve residual secondary
//! locks through the primary, which is why the driver may swallow
//! secondary-commit failures.
//!
//! The coordinator holds one client; each worker partition connects its
//! own through [`KvClientFactory`] and closes it when the partition task
//! finishes.

use std::sync::Arc;

use async_trait::async_trait;

use caravel_common::constants::{BATCH_PREWRITE_BACKOFF_MS, PRIMARY_KEY_COMMIT_BACKOFF_MS};
use caravel_common::error::CaravelResult;
use caravel_common::types::{Key, KvPair, Timestamp};

/// Retry budget for one logical RPC.
///
/// The store client retries region errors and transient failures
/// internally; the budget caps the total time it may spend doing so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total sleep budget in milliseconds.
    pub max_sleep_ms: u64,
}

impl Backoff {
    /// Creates a backoff budget.
    #[inline]
    #[must_use]
    pub const fn new(max_sleep_ms: u64) -> Self {
        Self { max_sleep_ms }
    }

    /// The budget for batch prewrite requests.
    #[inline]
    #[must_use]
    pub const fn batch_prewrite() -> Self {
        Self::new(BATCH_PREWRITE_BACKOFF_MS)
    }

    /// The budget for the primary-key commit.
    ///
    /// Sized to finish before the server's stale table-lock cleaner could
    /// fire; see `caravel_common::constants`.
    #[inline]
    #[must_use]
    pub const fn primary_key_commit() -> Self {
        Self::new(PRIMARY_KEY_COMMIT_BACKOFF_MS)
    }
}

/// One connection to the store's transactional KV API.
#[async_trait]
pub trait KvRpcClient: Send + Sync {
    /// Prewrites the primary pair: a lock (marked primary) plus tentative
    /// data at `start_ts`, with the given TTL.
    async fn prewrite_primary(
        &self,
        backoff: Backoff,
        primary: KvPair,
        start_ts: Timestamp,
        lock_ttl_ms: u64,
    ) -> CaravelResult<()>;

    /// Prewrites secondary pairs, each lock pointing at `primary`.
    async fn prewrite_secondaries(
        &self,
        primary: Key,
        pairs: Vec<KvPair>,
        start_ts: Timestamp,
        lock_ttl_ms: u64,
    ) -> CaravelResult<()>;

    /// Converts the primary lock into a committed write record at
    /// `commit_ts`. After this returns, the transaction is durable.
    async fn commit_primary(
        &self,
        backoff: Backoff,
        primary: Key,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> CaravelResult<()>;

    /// Commits secondary keys at `commit_ts`. Individually best-effort:
    /// readers can resolve any key this call misses via the primary.
    async fn commit_secondaries(
        &self,
        keys: Vec<Key>,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> CaravelResult<()>;

    /// Extends the primary lock's TTL; returns the TTL now in effect.
    async fn txn_heartbeat(
        &self,
        primary: Key,
        start_ts: Timestamp,
        ttl_ms: u64,
    ) -> CaravelResult<u64>;

    /// Reads the committed values visible at `ts` for `keys`; misses are
    /// omitted from the result.
    async fn snapshot_batch_get(
        &self,
        keys: Vec<Key>,
        ts: Timestamp,
    ) -> CaravelResult<Vec<KvPair>>;

    /// Whether the server supports online TTL refresh (>= 3.0.5).
    fn supports_ttl_update(&self) -> bool;

    /// Releases the connection. Workers call this at the end of each
    /// partition task.
    async fn close(&self) -> CaravelResult<()>;
}

/// Creates per-worker [`KvRpcClient`] connections.
#[async_trait]
pub trait KvClientFactory: Send + Sync {
    /// Opens a new client connection.
    async fn connect(&self) -> CaravelResult<Arc<dyn KvRpcClient>>;
}
