//! Catalog client surface.
//!
//! Serves database and table descriptors. The writer reads a table's
//! descriptor once at the start of a write and re-reads only the
//! `update_timestamp` before commit (the schema-change guard); holding the
//! table write-lock makes that re-read unnecessary.

use async_trait::async_trait;

use caravel_common::error::CaravelResult;
use caravel_common::schema::TableInfo;

/// Client for the store's catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolves a table descriptor by database and table name.
    ///
    /// Errors with `DatabaseNotFound` / `TableNotFound` when the names do
    /// not resolve.
    async fn table_info(&self, database: &str, table: &str) -> CaravelResult<TableInfo>;

    /// Re-reads just the table's schema version stamp.
    async fn table_update_timestamp(&self, database: &str, table: &str) -> CaravelResult<i64>;
}
