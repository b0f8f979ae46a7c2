//! Input deduplication.
//!
//! Collapses duplicates within the input before any store round-trip: one
//! representative per row key (when the primary key is the handle), then
//! one per unique-index key. The representative is the first occurrence in
//! input order, which keeps the choice deterministic across pipeline
//! restarts.

use std::collections::HashSet;

use tracing::debug;

use caravel_codec::{encode_row_key, encode_unique_index_key, Datum, Row};
use caravel_common::error::CaravelResult;
use caravel_common::schema::TableInfo;
use caravel_common::types::Handle;

/// Deduplicates `(row, handle)` pairs by row key and by every unique
/// index key, keeping the first occurrence of each.
pub fn dedup_rows(
    table: &TableInfo,
    mut rows: Vec<(Row, Handle)>,
) -> CaravelResult<Vec<(Row, Handle)>> {
    let before = rows.len();

    if table.pk_is_handle {
        let mut seen = HashSet::with_capacity(rows.len());
        rows.retain(|(_, handle)| seen.insert(encode_row_key(table.table_id, *handle)));
    }

    for index in table.unique_indices() {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut failed = None;
        rows.retain(|(row, _)| {
            if failed.is_some() {
                return true;
            }
            // A NULL in the indexed columns never collides.
            if index
                .column_offsets
                .iter()
                .any(|&o| row.get(o).map_or(true, Datum::is_null))
            {
                return true;
            }
            match encode_unique_index_key(table.table_id, index, row) {
                Ok(key) => seen.insert(key),
                Err(e) => {
                    failed = Some(e);
                    true
                }
            }
        });
        if let Some(e) = failed {
            return Err(e);
        }
    }

    if rows.len() < before {
        debug!(
            table = %table.name,
            dropped = before - rows.len(),
            kept = rows.len(),
            "collapsed duplicate keys in input"
        );
    }
    Ok(rows)
}
