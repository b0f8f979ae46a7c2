//! KV expansion and the insert-over-delete merge.
//!
//! Every `(row, handle)` expands to exactly `1 + num_indices` pairs: the
//! row KV plus one KV per index. In delete mode every value is the empty
//! delete sentinel.
//!
//! The merge unions input puts with conflict deletes by encoded key; a put
//! masks a delete for the same key, so no key reaches the store as both.

use std::collections::HashMap;

use caravel_codec::{
    encode_handle_value, encode_non_unique_index_key, encode_row_key, encode_row_value,
    encode_unique_index_key, non_unique_index_value, Row,
};
use caravel_common::error::CaravelResult;
use caravel_common::schema::TableInfo;
use caravel_common::types::{Handle, Key, KvPair, Value};

/// Whether an expansion writes or erases its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write the row and its index entries.
    Put,
    /// Erase the row and its index entries.
    Delete,
}

/// Expands one `(row, handle)` into its row KV and index KVs.
pub fn expand_row(
    table: &TableInfo,
    row: &Row,
    handle: Handle,
    mode: WriteMode,
) -> CaravelResult<Vec<KvPair>> {
    let mut pairs = Vec::with_capacity(1 + table.indices.len());

    let row_value = match mode {
        WriteMode::Put => encode_row_value(table, row)?,
        WriteMode::Delete => Value::empty(),
    };
    pairs.push(KvPair::new(encode_row_key(table.table_id, handle), row_value));

    for index in &table.indices {
        let pair = if index.unique {
            let key = encode_unique_index_key(table.table_id, index, row)?;
            let value = match mode {
                WriteMode::Put => encode_handle_value(handle),
                WriteMode::Delete => Value::empty(),
            };
            KvPair::new(key, value)
        } else {
            let key = encode_non_unique_index_key(table.table_id, index, row, handle)?;
            let value = match mode {
                WriteMode::Put => non_unique_index_value(),
                WriteMode::Delete => Value::empty(),
            };
            KvPair::new(key, value)
        };
        pairs.push(pair);
    }
    Ok(pairs)
}

/// Expands puts for the deduplicated input and deletes for the conflict
/// set, merged so a put masks a delete on the same key.
///
/// Output order is deterministic: deletes in conflict order, then puts in
/// input order, with masked deletes overwritten in place. The two-phase
/// commit driver picks its primary key off the front of this stream.
pub fn expand_and_merge(
    table: &TableInfo,
    puts: &[(Row, Handle)],
    deletes: &[(Row, Handle)],
) -> CaravelResult<Vec<KvPair>> {
    let mut merged: Vec<KvPair> = Vec::new();
    let mut by_key: HashMap<Key, usize> = HashMap::new();

    for (row, handle) in deletes {
        for pair in expand_row(table, row, *handle, WriteMode::Delete)? {
            if let Some(&i) = by_key.get(&pair.key) {
                merged[i] = pair;
            } else {
                by_key.insert(pair.key.clone(), merged.len());
                merged.push(pair);
            }
        }
    }
    for (row, handle) in puts {
        for pair in expand_row(table, row, *handle, WriteMode::Put)? {
            if let Some(&i) = by_key.get(&pair.key) {
                merged[i] = pair;
            } else {
                by_key.insert(pair.key.clone(), merged.len());
                merged.push(pair);
            }
        }
    }
    Ok(merged)
}
