//! Synchronous SQL side channel.
//!
//! A single SQL connection on the coordinator, used for exactly two
//! things: holding a table write-lock across the write (`LOCK TABLES t
//! WRITE LOCAL`) and sending fire-and-forget region-split hints. It never
//! carries data.
//!
//! The channel's health matters at commit time: if the connection died,
//! the server may already have cleaned our table lock, so the driver
//! checks [`SideChannel::is_closed`] before committing the primary.

use async_trait::async_trait;

use caravel_common::error::CaravelResult;

/// The coordinator's SQL side channel.
#[async_trait]
pub trait SideChannel: Send + Sync {
    /// Whether the server advertises table-lock support.
    async fn supports_table_lock(&self) -> CaravelResult<bool>;

    /// The server's `delay-clean-table-lock` setting in milliseconds.
    ///
    /// The writer refuses to rely on a table lock the server would clean
    /// sooner than the primary commit's backoff budget allows.
    async fn delay_clean_table_lock_ms(&self) -> CaravelResult<u64>;

    /// Takes the table write-lock. Blocks other writers until
    /// [`SideChannel::unlock_tables`] or the connection drops.
    async fn lock_table_write(&self, database: &str, table: &str) -> CaravelResult<()>;

    /// Releases every table lock held by this connection.
    async fn unlock_tables(&self) -> CaravelResult<()>;

    /// Whether the connection has died. A closed channel before primary
    /// commit aborts the write.
    fn is_closed(&self) -> bool;

    /// Hints the store to pre-split the table's row keyspace over the
    /// handle range `[lower, upper]` into `regions` regions.
    async fn split_table_region(
        &self,
        database: &str,
        table: &str,
        lower: i64,
        upper: i64,
        regions: u32,
    ) -> CaravelResult<()>;

    /// Hints the store to pre-split one index's keyspace between the
    /// given bounds (string form of the first indexed column).
    async fn split_index_region(
        &self,
        database: &str,
        table: &str,
        index: &str,
        lower: &str,
        upper: &str,
        regions: u32,
    ) -> CaravelResult<()>;
}
