//! Row and index key encoding.
//!
//! Key layout (all components memcomparable, see [`crate::comparable`]):
//!
//! ```text
//! row key:              t <table_id> _r <handle>
//! unique index key:     t <table_id> _i <index_id> <datum>...
//! non-unique index key: t <table_id> _i <index_id> <datum>... <handle>
//! ```
//!
//! Unique index keys carry no handle (the handle lives in the value);
//! appending the handle to non-unique index keys is what makes them unique
//! per row. Because `_i` sorts before `_r`, a table's index data sits just
//! below its row data in one contiguous keyspace slice starting at
//! [`table_prefix`].

use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::IndexInfo;
use caravel_common::types::{Handle, Key, TableId};

use crate::comparable::{decode_i64, encode_datum_key, encode_i64};
use crate::datum::Row;

const TABLE_PREFIX: u8 = b't';
const ROW_SEP: &[u8] = b"_r";
const INDEX_SEP: &[u8] = b"_i";

/// Returns the key prefix that every key of `table_id` starts with.
#[must_use]
pub fn table_prefix(table_id: TableId) -> Key {
    let mut buf = Vec::with_capacity(9);
    buf.push(TABLE_PREFIX);
    encode_i64(&mut buf, table_id.as_i64());
    Key::from_vec(buf)
}

/// Returns the key prefix that every row key of `table_id` starts with.
#[must_use]
pub fn row_prefix(table_id: TableId) -> Key {
    let mut buf = Vec::with_capacity(11);
    buf.push(TABLE_PREFIX);
    encode_i64(&mut buf, table_id.as_i64());
    buf.extend_from_slice(ROW_SEP);
    Key::from_vec(buf)
}

/// Returns the key prefix of one index of `table_id`.
#[must_use]
pub fn index_prefix(table_id: TableId, index: &IndexInfo) -> Key {
    let mut buf = Vec::with_capacity(20);
    buf.push(TABLE_PREFIX);
    encode_i64(&mut buf, table_id.as_i64());
    buf.extend_from_slice(INDEX_SEP);
    encode_i64(&mut buf, index.index_id.as_i64());
    Key::from_vec(buf)
}

/// Encodes the row key for `(table_id, handle)`.
#[must_use]
pub fn encode_row_key(table_id: TableId, handle: Handle) -> Key {
    let mut buf = Vec::with_capacity(19);
    buf.push(TABLE_PREFIX);
    encode_i64(&mut buf, table_id.as_i64());
    buf.extend_from_slice(ROW_SEP);
    encode_i64(&mut buf, handle.as_i64());
    Key::from_vec(buf)
}

/// Extracts the handle from a row key of `table_id`.
///
/// The inverse of [`encode_row_key`]; mainly useful to store-side helpers
/// and invariant checks.
pub fn decode_row_key_handle(table_id: TableId, key: &Key) -> CaravelResult<Handle> {
    let prefix = row_prefix(table_id);
    let bytes = key.as_bytes();
    let rest = bytes
        .strip_prefix(prefix.as_bytes())
        .ok_or_else(|| CaravelError::corruption(format!("not a row key of table {table_id}")))?;
    let mut rest = rest;
    let handle = decode_i64(&mut rest)?;
    if !rest.is_empty() {
        return Err(CaravelError::corruption("trailing bytes after row key"));
    }
    Ok(Handle::new(handle))
}

/// Encodes the key of a unique index entry.
///
/// The handle is deliberately absent: it is stored in the value, so two
/// rows with equal indexed columns collide on the same key.
pub fn encode_unique_index_key(
    table_id: TableId,
    index: &IndexInfo,
    row: &Row,
) -> CaravelResult<Key> {
    let mut buf = index_prefix(table_id, index).as_bytes().to_vec();
    push_index_datums(&mut buf, index, row)?;
    Ok(Key::from_vec(buf))
}

/// Encodes the key of a non-unique index entry.
///
/// The handle is appended after the indexed datums, making the key unique
/// per row.
pub fn encode_non_unique_index_key(
    table_id: TableId,
    index: &IndexInfo,
    row: &Row,
    handle: Handle,
) -> CaravelResult<Key> {
    let mut buf = index_prefix(table_id, index).as_bytes().to_vec();
    push_index_datums(&mut buf, index, row)?;
    encode_i64(&mut buf, handle.as_i64());
    Ok(Key::from_vec(buf))
}

fn push_index_datums(buf: &mut Vec<u8>, index: &IndexInfo, row: &Row) -> CaravelResult<()> {
    for &offset in &index.column_offsets {
        let datum = row.get(offset).ok_or_else(|| {
            CaravelError::internal(format!(
                "index '{}' references offset {offset} beyond row width {}",
                index.name,
                row.width()
            ))
        })?;
        encode_datum_key(buf, datum);
    }
    Ok(())
}
