//! Region pre-split hints.
//!
//! Fire-and-forget requests over the side channel that ask the store to
//! split the table's (and its indices') keyspace before the write lands,
//! so the secondary fan-out can actually run in parallel. A rejected hint
//! costs nothing; errors are logged and swallowed unless the write runs
//! in test mode.

use tracing::warn;

use caravel_codec::{Datum, Row};
use caravel_common::config::WriteConfig;
use caravel_common::error::CaravelResult;
use caravel_common::schema::TableInfo;
use caravel_common::types::Handle;
use caravel_store::SideChannel;

/// Input statistics feeding the split heuristics.
#[derive(Debug, Clone, Copy)]
pub struct SplitStats {
    /// Number of rows to be written.
    pub row_count: usize,
    /// Rough encoded size of the whole input in bytes.
    pub total_bytes: u64,
    /// Smallest handle in the input.
    pub min_handle: i64,
    /// Largest handle in the input.
    pub max_handle: i64,
}

impl SplitStats {
    /// Computes statistics over the deduplicated input; `None` when empty.
    #[must_use]
    pub fn from_rows(rows: &[(Row, Handle)]) -> Option<Self> {
        let first = rows.first()?;
        let mut stats = Self {
            row_count: rows.len(),
            total_bytes: 0,
            min_handle: first.1.as_i64(),
            max_handle: first.1.as_i64(),
        };
        for (row, handle) in rows {
            stats.total_bytes += estimated_row_bytes(row);
            stats.min_handle = stats.min_handle.min(handle.as_i64());
            stats.max_handle = stats.max_handle.max(handle.as_i64());
        }
        Some(stats)
    }
}

/// Sends table and index pre-split hints for this write's input.
///
/// With an explicit `region_split_num` the table split covers the whole
/// positive handle range; an estimated count only splits when the input's
/// handle spread is wide enough to be worth it.
pub async fn pre_split_regions(
    side_channel: &dyn SideChannel,
    database: &str,
    table: &TableInfo,
    rows: &[(Row, Handle)],
    config: &WriteConfig,
) -> CaravelResult<()> {
    let Some(stats) = SplitStats::from_rows(rows) else {
        return Ok(());
    };

    let result = send_hints(side_channel, database, table, rows, config, stats).await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if config.is_test => Err(e),
        Err(e) => {
            warn!(table = %table.name, error = %e, "region pre-split rejected, continuing");
            Ok(())
        }
    }
}

async fn send_hints(
    side_channel: &dyn SideChannel,
    database: &str,
    table: &TableInfo,
    rows: &[(Row, Handle)],
    config: &WriteConfig,
    stats: SplitStats,
) -> CaravelResult<()> {
    let split_num = if config.region_split_num > 0 {
        side_channel
            .split_table_region(database, &table.name, 0, i64::from(i32::MAX), config.region_split_num)
            .await?;
        config.region_split_num
    } else {
        let estimated = estimate_split_num(stats.total_bytes, config.split_size_mb);
        let spread = stats.max_handle.saturating_sub(stats.min_handle);
        if estimated > 1 && spread > i64::from(estimated) * config.handle_spread_per_region {
            side_channel
                .split_table_region(
                    database,
                    &table.name,
                    stats.min_handle,
                    stats.max_handle,
                    estimated,
                )
                .await?;
        }
        estimated
    };

    if split_num <= 1 {
        return Ok(());
    }
    for index in &table.indices {
        let Some(&first_offset) = index.column_offsets.first() else {
            continue;
        };
        let mut bounds: Vec<String> = rows
            .iter()
            .filter_map(|(row, _)| row.get(first_offset))
            .filter(|d| !d.is_null())
            .map(Datum::to_split_bound)
            .collect();
        bounds.sort();
        let (Some(lower), Some(upper)) = (bounds.first(), bounds.last()) else {
            continue;
        };
        side_channel
            .split_index_region(database, &table.name, &index.name, lower, upper, split_num)
            .await?;
    }
    Ok(())
}

fn estimate_split_num(total_bytes: u64, split_size_mb: u64) -> u32 {
    let region_bytes = split_size_mb * 1024 * 1024;
    total_bytes.div_ceil(region_bytes).min(u64::from(u32::MAX)) as u32
}

fn estimated_row_bytes(row: &Row) -> u64 {
    row.datums()
        .map(|d| match d {
            Datum::Null => 1,
            Datum::Bool(_) => 2,
            Datum::Int(_) | Datum::UInt(_) | Datum::Float(_) => 9,
            Datum::Str(s) => 5 + s.len() as u64,
            Datum::Bytes(b) => 5 + b.len() as u64,
        })
        .sum()
}
