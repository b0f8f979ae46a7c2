//! Row and index value encoding.
//!
//! Row values are not memcomparable (nothing ever routes on a value);
//! they use a compact tagged format:
//!
//! ```text
//! row value:          <count:u32> ( <offset:u32> <tag:u8> <payload> )*
//! unique index value: <handle:i64 big-endian>
//! non-unique value:   '0'
//! ```
//!
//! When the table's primary key is the handle, the handle column is not
//! stored in the row value; [`decode_row_value`] restores it from the
//! handle that was decoded out of the row key. The empty value is the
//! delete sentinel and never a legal encoding of a row.

use bytes::Bytes;

use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::{FieldType, TableInfo};
use caravel_common::types::{Handle, Value};

use crate::datum::{Datum, Row};

mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const UINT: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const BYTES: u8 = 5;
    pub const STR: u8 = 6;
}

/// The value stored under every non-unique index key.
#[must_use]
pub fn non_unique_index_value() -> Value {
    Value::from_bytes(b"0")
}

/// Encodes the handle as a unique-index value: 8 bytes, big-endian, signed.
#[must_use]
pub fn encode_handle_value(handle: Handle) -> Value {
    Value::from_vec(handle.to_be_bytes().to_vec())
}

/// Decodes the handle out of a unique-index value.
pub fn decode_handle_from_unique_index(value: &Value) -> CaravelResult<Handle> {
    let bytes: [u8; 8] = value.as_bytes().try_into().map_err(|_| {
        CaravelError::corruption(format!(
            "unique index value must be 8 bytes, got {}",
            value.len()
        ))
    })?;
    Ok(Handle::from_be_bytes(bytes))
}

/// Encodes a row's stored columns into a row value.
///
/// The handle column is skipped when `table.pk_is_handle`; its value is
/// recoverable from the row key.
pub fn encode_row_value(table: &TableInfo, row: &Row) -> CaravelResult<Value> {
    let skip = if table.pk_is_handle {
        table.handle_offset
    } else {
        None
    };

    let mut buf = Vec::with_capacity(16 + row.width() * 12);
    let stored = row.width() - usize::from(skip.is_some());
    buf.extend_from_slice(&u32::try_from(stored).map_err(|_| row_too_wide(row))?.to_be_bytes());

    for offset in 0..row.width() {
        if Some(offset) == skip {
            continue;
        }
        let datum = row
            .get(offset)
            .ok_or_else(|| CaravelError::internal("row narrower than its own width"))?;
        buf.extend_from_slice(&(offset as u32).to_be_bytes());
        encode_datum_value(&mut buf, datum);
    }
    Ok(Value::from_vec(buf))
}

/// Decodes a row value back into a full-width row.
///
/// `handle` fills the handle column when the table's primary key is the
/// handle; it is ignored otherwise.
pub fn decode_row_value(value: &Value, handle: Handle, table: &TableInfo) -> CaravelResult<Row> {
    if value.is_delete() {
        return Err(CaravelError::corruption(
            "empty value is a delete sentinel, not a row",
        ));
    }

    let mut input = value.as_bytes();
    let count = decode_u32(&mut input)? as usize;
    let mut row = Row::nulls(table.column_count());

    for _ in 0..count {
        let offset = decode_u32(&mut input)? as usize;
        if offset >= table.column_count() {
            return Err(CaravelError::corruption(format!(
                "column offset {offset} beyond table width {}",
                table.column_count()
            )));
        }
        row.set(offset, decode_datum_value(&mut input)?);
    }
    if !input.is_empty() {
        return Err(CaravelError::corruption("trailing bytes after row value"));
    }

    if table.pk_is_handle {
        if let Some(offset) = table.handle_offset {
            let datum = match table.columns[offset].field_type {
                FieldType::UnsignedBigInt => Datum::UInt(handle.as_i64() as u64),
                _ => Datum::Int(handle.as_i64()),
            };
            row.set(offset, datum);
        }
    }
    Ok(row)
}

fn encode_datum_value(buf: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Null => buf.push(tag::NULL),
        Datum::Bool(b) => {
            buf.push(tag::BOOL);
            buf.push(u8::from(*b));
        }
        Datum::Int(i) => {
            buf.push(tag::INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Datum::UInt(u) => {
            buf.push(tag::UINT);
            buf.extend_from_slice(&u.to_le_bytes());
        }
        Datum::Float(f) => {
            buf.push(tag::FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Datum::Bytes(b) => {
            buf.push(tag::BYTES);
            buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
            buf.extend_from_slice(b);
        }
        Datum::Str(s) => {
            buf.push(tag::STR);
            buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

fn decode_datum_value(input: &mut &[u8]) -> CaravelResult<Datum> {
    let t = take(input, 1)?[0];
    match t {
        tag::NULL => Ok(Datum::Null),
        tag::BOOL => Ok(Datum::Bool(take(input, 1)?[0] != 0)),
        tag::INT => {
            let raw: [u8; 8] = take(input, 8)?.try_into().expect("sized take");
            Ok(Datum::Int(i64::from_le_bytes(raw)))
        }
        tag::UINT => {
            let raw: [u8; 8] = take(input, 8)?.try_into().expect("sized take");
            Ok(Datum::UInt(u64::from_le_bytes(raw)))
        }
        tag::FLOAT => {
            let raw: [u8; 8] = take(input, 8)?.try_into().expect("sized take");
            Ok(Datum::Float(f64::from_le_bytes(raw)))
        }
        tag::BYTES => {
            let len = decode_u32(input)? as usize;
            Ok(Datum::Bytes(Bytes::copy_from_slice(take(input, len)?)))
        }
        tag::STR => {
            let len = decode_u32(input)? as usize;
            let raw = take(input, len)?;
            let s = std::str::from_utf8(raw)
                .map_err(|_| CaravelError::corruption("invalid UTF-8 in string datum"))?;
            Ok(Datum::Str(s.to_string()))
        }
        other => Err(CaravelError::corruption(format!(
            "unknown datum tag {other:#04x}"
        ))),
    }
}

fn decode_u32(input: &mut &[u8]) -> CaravelResult<u32> {
    let raw: [u8; 4] = take(input, 4)?.try_into().expect("sized take");
    Ok(u32::from_be_bytes(raw))
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> CaravelResult<&'a [u8]> {
    if input.len() < n {
        return Err(CaravelError::corruption(format!(
            "need {n} bytes, have {}",
            input.len()
        )));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

fn row_too_wide(row: &Row) -> CaravelError {
    CaravelError::internal(format!("row width {} exceeds u32", row.width()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_common::schema::ColumnInfo;
    use caravel_common::types::{DatabaseId, TableId};

    fn table(pk_is_handle: bool) -> TableInfo {
        let t = TableInfo::new(
            DatabaseId::new(1),
            TableId::new(5),
            "t",
            vec![
                ColumnInfo::new("id", 0, FieldType::BigInt).not_null(),
                ColumnInfo::new("b", 1, FieldType::Boolean),
                ColumnInfo::new("f", 2, FieldType::Double),
                ColumnInfo::new("s", 3, FieldType::Varchar),
                ColumnInfo::new("raw", 4, FieldType::Blob),
                ColumnInfo::new("u", 5, FieldType::UnsignedBigInt),
            ],
        );
        if pk_is_handle {
            t.with_pk_handle(0)
        } else {
            t
        }
    }

    fn sample_row() -> Row {
        Row::from_datums(vec![
            Datum::Int(7),
            Datum::Bool(true),
            Datum::Float(2.5),
            Datum::Str("hello".to_string()),
            Datum::Bytes(Bytes::from_static(b"\x00\x01")),
            Datum::UInt(u64::MAX),
        ])
    }

    #[test]
    fn test_row_value_round_trip_every_type() {
        let table = table(false);
        let row = sample_row();
        let value = encode_row_value(&table, &row).unwrap();
        let decoded = decode_row_value(&value, Handle::new(7), &table).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_row_value_round_trip_with_nulls() {
        let table = table(false);
        let mut row = sample_row();
        row.set(3, Datum::Null);
        row.set(4, Datum::Null);
        let value = encode_row_value(&table, &row).unwrap();
        let decoded = decode_row_value(&value, Handle::new(7), &table).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_pk_handle_column_restored_from_key() {
        let table_pk_handle = table(true);
        let row = sample_row();
        let value = encode_row_value(&table_pk_handle, &row).unwrap();

        // The stored value must not contain the handle column.
        let without_pk = decode_row_value(&value, Handle::new(99), &table_pk_handle).unwrap();
        assert_eq!(without_pk.get(0), Some(&Datum::Int(99)));

        let table_no_pk_handle = table(false);
        let bigger = encode_row_value(&table_no_pk_handle, &row).unwrap();
        assert!(value.len() < bigger.len());
    }

    #[test]
    fn test_handle_value_round_trip() {
        for h in [-3_i64, 0, 12345, i64::MAX] {
            let value = encode_handle_value(Handle::new(h));
            assert_eq!(value.len(), 8);
            assert_eq!(
                decode_handle_from_unique_index(&value).unwrap().as_i64(),
                h
            );
        }
    }

    #[test]
    fn test_handle_value_is_big_endian_signed() {
        let value = encode_handle_value(Handle::new(1));
        assert_eq!(value.as_bytes(), &[0, 0, 0, 0, 0, 0, 0, 1]);
        let value = encode_handle_value(Handle::new(-1));
        assert_eq!(value.as_bytes(), &[0xFF; 8]);
    }

    #[test]
    fn test_delete_sentinel_rejected() {
        assert!(decode_row_value(&Value::empty(), Handle::ZERO, &table(false)).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decode_row_value(&Value::from_bytes(b"\x00\x00\x00\x01\xFF"), Handle::ZERO, &table(false));
        assert!(err.is_err());
        assert!(decode_handle_from_unique_index(&Value::from_bytes(b"short")).is_err());
    }

    #[test]
    fn test_non_unique_marker() {
        assert_eq!(non_unique_index_value().as_bytes(), b"0");
    }
}
