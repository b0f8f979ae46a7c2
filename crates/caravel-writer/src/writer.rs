//! The batch-write entry point.
//!
//! [`BatchWriter::write`] wires the pipeline together: resolve the table,
//! take the optional table write-lock, normalize and deduplicate the
//! input, send split hints, probe for conflicts, expand and merge the KV
//! stream, partition it by region, and hand the buckets to the two-phase
//! commit driver. The table lock is released on every exit path; teardown
//! failures are logged, never propagated.

use std::sync::Arc;

use tracing::{info, warn};

use caravel_common::config::WriteConfig;
use caravel_common::constants::MIN_DELAY_CLEAN_TABLE_LOCK_MS;
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::TableInfo;
use caravel_common::types::Timestamp;
use caravel_store::{
    CatalogClient, KvClientFactory, MetaClient, PdClient, RegionRouter, RowIdAllocator,
    SideChannel,
};

use crate::conflict::ConflictResolver;
use crate::dataset::Dataset;
use crate::dedup::dedup_rows;
use crate::expand::expand_and_merge;
use crate::normalize::normalize_and_assign;
use crate::partition::partition_pairs;
use crate::split::pre_split_regions;
use crate::twopc::TwoPhaseCommitter;

/// The table a write lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    /// Database name.
    pub database: String,
    /// Table name.
    pub table: String,
}

impl WriteTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

/// What a successful write did.
#[derive(Debug, Clone, Copy)]
pub struct WriteSummary {
    /// Rows persisted (after deduplication).
    pub rows_written: usize,
    /// The transaction's start timestamp.
    pub start_ts: Timestamp,
    /// The transaction's commit timestamp.
    pub commit_ts: Timestamp,
}

/// Batch-write coordinator.
///
/// Holds one channel to each collaborator; worker partitions open their
/// own KV clients through the factory.
pub struct BatchWriter {
    pd: Arc<dyn PdClient>,
    kv_factory: Arc<dyn KvClientFactory>,
    catalog: Arc<dyn CatalogClient>,
    meta: Arc<dyn MetaClient>,
    side_channel: Option<Arc<dyn SideChannel>>,
}

impl BatchWriter {
    /// Creates a writer without a side channel; table locks and split
    /// hints are unavailable until one is attached.
    #[must_use]
    pub fn new(
        pd: Arc<dyn PdClient>,
        kv_factory: Arc<dyn KvClientFactory>,
        catalog: Arc<dyn CatalogClient>,
        meta: Arc<dyn MetaClient>,
    ) -> Self {
        Self {
            pd,
            kv_factory,
            catalog,
            meta,
            side_channel: None,
        }
    }

    /// Attaches the SQL side channel.
    #[must_use]
    pub fn with_side_channel(mut self, side_channel: Arc<dyn SideChannel>) -> Self {
        self.side_channel = Some(side_channel);
        self
    }

    /// Writes `dataset` into `target` as one transaction.
    pub async fn write(
        &self,
        dataset: &dyn Dataset,
        target: &WriteTarget,
        config: &WriteConfig,
    ) -> CaravelResult<WriteSummary> {
        if !config.enabled {
            return Err(CaravelError::BatchWriteDisabled);
        }
        config.validate()?;

        let table = self.catalog.table_info(&target.database, &target.table).await?;
        if table.is_partitioned() {
            return Err(CaravelError::TablePartitioned {
                table: table.name.clone(),
            });
        }
        if table.has_generated_columns() {
            return Err(CaravelError::GeneratedColumns {
                table: table.name.clone(),
            });
        }

        let input_count = dataset.count();
        info!(
            database = %target.database,
            table = %table.name,
            rows = input_count,
            replace = config.replace,
            "starting batch write"
        );

        let start_ts = self.pd.get_timestamp().await?;
        let lock_held = self.acquire_table_lock(target, config).await?;

        let result = self
            .write_rows(dataset, target, &table, config, start_ts, lock_held)
            .await;

        if lock_held {
            if let Some(side_channel) = &self.side_channel {
                if let Err(e) = side_channel.unlock_tables().await {
                    warn!(table = %table.name, error = %e, "failed to release table lock");
                }
            }
        }
        result
    }

    async fn write_rows(
        &self,
        dataset: &dyn Dataset,
        target: &WriteTarget,
        table: &TableInfo,
        config: &WriteConfig,
        start_ts: Timestamp,
        lock_held: bool,
    ) -> CaravelResult<WriteSummary> {
        if dataset.count() == 0 {
            info!(table = %table.name, "empty input, nothing to write");
            return Ok(WriteSummary {
                rows_written: 0,
                start_ts,
                commit_ts: start_ts,
            });
        }

        let allocator = RowIdAllocator::new(Arc::clone(&self.meta));
        let rows = normalize_and_assign(table, dataset, &allocator).await?;
        let rows = dedup_rows(table, rows)?;

        if config.enable_region_split {
            if let Some(side_channel) = &self.side_channel {
                pre_split_regions(side_channel.as_ref(), &target.database, table, &rows, config)
                    .await?;
            }
        }

        let to_delete = if table.constraint_check_needed() {
            let conflict_client = self.kv_factory.connect().await?;
            let resolver = ConflictResolver::new(
                table,
                Arc::clone(&conflict_client),
                start_ts,
                config.snapshot_batch_get_size,
                config.replace,
            );
            let resolved = resolver.resolve(&rows).await;
            if let Err(e) = conflict_client.close().await {
                warn!(error = %e, "failed to close conflict-probe client");
            }
            resolved?
        } else {
            Vec::new()
        };

        let merged = expand_and_merge(table, &rows, &to_delete)?;

        // Regions are fetched after the split hints so routing reflects
        // any splits the store accepted.
        let router = RegionRouter::new(self.pd.regions_for_table(table.table_id).await?)?;
        let buckets = partition_pairs(&router, merged, config.write_concurrency)?;

        let mut committer = TwoPhaseCommitter::new(
            Arc::clone(&self.kv_factory),
            Arc::clone(&self.pd),
            Arc::clone(&self.catalog),
            self.side_channel.clone(),
            target.database.clone(),
            table.clone(),
            config.clone(),
        );
        if lock_held {
            committer.mark_locked()?;
        }
        let outcome = committer.execute(buckets, start_ts).await?;

        info!(
            table = %table.name,
            rows = rows.len(),
            keys = outcome.keys_written,
            %start_ts,
            commit_ts = %outcome.commit_ts,
            "batch write committed"
        );
        Ok(WriteSummary {
            rows_written: rows.len(),
            start_ts,
            commit_ts: outcome.commit_ts,
        })
    }

    /// Takes the table write-lock when asked to; returns whether it is
    /// held.
    async fn acquire_table_lock(
        &self,
        target: &WriteTarget,
        config: &WriteConfig,
    ) -> CaravelResult<bool> {
        if !config.use_table_lock {
            return Ok(false);
        }
        let Some(side_channel) = &self.side_channel else {
            if config.allow_write_without_lock {
                warn!(table = %target.table, "no side channel attached, writing without table lock");
                return Ok(false);
            }
            return Err(CaravelError::TableLockUnsupported);
        };

        if !side_channel.supports_table_lock().await? {
            if config.allow_write_without_lock {
                warn!(table = %target.table, "server lacks table locks, writing without one");
                return Ok(false);
            }
            return Err(CaravelError::TableLockUnsupported);
        }

        let delay_ms = side_channel.delay_clean_table_lock_ms().await?;
        if delay_ms < MIN_DELAY_CLEAN_TABLE_LOCK_MS {
            return Err(CaravelError::DelayCleanTableLockTooSmall {
                actual_ms: delay_ms,
                min_ms: MIN_DELAY_CLEAN_TABLE_LOCK_MS,
            });
        }

        side_channel
            .lock_table_write(&target.database, &target.table)
            .await?;
        info!(database = %target.database, table = %target.table, "table write-lock acquired");
        Ok(true)
    }
}
