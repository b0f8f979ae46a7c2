//! Row normalization and handle assignment.
//!
//! Projects input records onto the table's declared column order, matching
//! field names case-insensitively and canonicalizing every value to its
//! column's type. Input arity must be the table's column count, or one
//! less when the auto-increment column is omitted; an omitted
//! auto-increment column is filled from a range reserved up front, `base +
//! i` in input order.
//!
//! Handle assignment follows: the handle column's value when the primary
//! key is the handle, otherwise a freshly reserved surrogate range, again
//! `base + i` in input order.

use std::collections::HashMap;

use tracing::debug;

use caravel_codec::{Datum, Row};
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::{ColumnInfo, FieldType, TableInfo};
use caravel_common::types::Handle;
use caravel_store::RowIdAllocator;

use crate::dataset::{Dataset, Record};

/// Normalizes every record of `dataset` and assigns a handle per row.
///
/// Records are consumed in partition order, which fixes the meaning of
/// "input order" for both auto-increment values and surrogate handles.
pub async fn normalize_and_assign(
    table: &TableInfo,
    dataset: &dyn Dataset,
    allocator: &RowIdAllocator,
) -> CaravelResult<Vec<(Row, Handle)>> {
    let records: Vec<Record> = (0..dataset.partition_count())
        .flat_map(|i| dataset.partition(i))
        .collect();
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let normalizer = RowNormalizer::new(table);
    let auto_fill = match table.auto_increment_column() {
        Some(col) if !normalizer.record_names_column(&records[0], col) => {
            let base = allocator
                .allocate(
                    table.database_id,
                    table.table_id,
                    records.len() as u64,
                    col.field_type == FieldType::UnsignedBigInt,
                )
                .await?;
            debug!(table = %table.name, base = %base, count = records.len(),
                "filling omitted auto-increment column");
            Some((col.offset, col.field_type, base))
        }
        _ => None,
    };

    let mut rows = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let mut row = normalizer.project(record, auto_fill.is_some())?;
        if let Some((offset, field_type, base)) = auto_fill {
            let id = base.offset(i as i64);
            let datum = match field_type {
                FieldType::UnsignedBigInt => Datum::UInt(id.as_i64() as u64),
                _ => Datum::Int(id.as_i64()),
            };
            row.set(offset, datum);
        }
        normalizer.check_nulls(&row)?;
        rows.push(row);
    }

    assign_handles(table, rows, allocator).await
}

async fn assign_handles(
    table: &TableInfo,
    rows: Vec<Row>,
    allocator: &RowIdAllocator,
) -> CaravelResult<Vec<(Row, Handle)>> {
    if table.pk_is_handle {
        let offset = table.handle_offset.ok_or_else(|| {
            CaravelError::internal("pk_is_handle table without a handle offset")
        })?;
        return rows
            .into_iter()
            .map(|row| {
                let handle = handle_from_datum(table, row.get(offset))?;
                Ok((row, handle))
            })
            .collect();
    }

    let base = allocator
        .allocate(table.database_id, table.table_id, rows.len() as u64, false)
        .await?;
    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| (row, base.offset(i as i64)))
        .collect())
}

fn handle_from_datum(table: &TableInfo, datum: Option<&Datum>) -> CaravelResult<Handle> {
    match datum {
        Some(Datum::Int(v)) => Ok(Handle::new(*v)),
        Some(Datum::UInt(v)) => Ok(Handle::new(*v as i64)),
        _ => Err(CaravelError::NullHandle {
            column: table
                .handle_column()
                .map_or_else(String::new, |c| c.name.clone()),
        }),
    }
}

/// Projects one record at a time onto a table's column order.
pub struct RowNormalizer<'a> {
    table: &'a TableInfo,
    by_name: HashMap<String, &'a ColumnInfo>,
}

impl<'a> RowNormalizer<'a> {
    /// Builds the case-insensitive column lookup for `table`.
    #[must_use]
    pub fn new(table: &'a TableInfo) -> Self {
        let by_name = table
            .columns
            .iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();
        Self { table, by_name }
    }

    /// Whether `record` carries a field naming `column`.
    #[must_use]
    pub fn record_names_column(&self, record: &Record, column: &ColumnInfo) -> bool {
        record
            .fields()
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(&column.name))
    }

    /// Projects `record` onto the table's column order.
    ///
    /// With `auto_omitted` the expected arity drops by one and the
    /// auto-increment cell is left NULL for the caller to fill.
    pub fn project(&self, record: &Record, auto_omitted: bool) -> CaravelResult<Row> {
        let expected = self.table.column_count() - usize::from(auto_omitted);
        if record.field_count() != expected {
            return Err(CaravelError::ColumnCountMismatch {
                expected: self.table.column_count(),
                actual: record.field_count(),
            });
        }

        let mut row = Row::nulls(self.table.column_count());
        for (name, datum) in record.fields() {
            let column = self
                .by_name
                .get(&name.to_lowercase())
                .ok_or_else(|| CaravelError::UnknownColumn {
                    column: name.clone(),
                })?;
            row.set(column.offset, datum.clone().canonicalize(column)?);
        }
        Ok(row)
    }

    /// Enforces the table's null constraints on a projected row.
    pub fn check_nulls(&self, row: &Row) -> CaravelResult<()> {
        for column in &self.table.columns {
            let is_null = row.get(column.offset).map_or(true, Datum::is_null);
            if !is_null {
                continue;
            }
            if column.auto_increment {
                return Err(CaravelError::NullAutoIncrement {
                    column: column.name.clone(),
                });
            }
            if self.table.pk_is_handle && Some(column.offset) == self.table.handle_offset {
                return Err(CaravelError::NullHandle {
                    column: column.name.clone(),
                });
            }
            if !column.nullable {
                return Err(CaravelError::NullInNotNullColumn {
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use caravel_common::types::{DatabaseId, TableId};
    use caravel_store::memory::MemoryCluster;

    use crate::dataset::VecDataset;

    fn plain_table() -> TableInfo {
        TableInfo::new(
            DatabaseId::new(1),
            TableId::new(2),
            "t",
            vec![
                ColumnInfo::new("a", 0, FieldType::BigInt).not_null(),
                ColumnInfo::new("b", 1, FieldType::Varchar),
            ],
        )
    }

    fn auto_inc_table() -> TableInfo {
        TableInfo::new(
            DatabaseId::new(1),
            TableId::new(3),
            "t",
            vec![
                ColumnInfo::new("id", 0, FieldType::BigInt).not_null().auto_increment(),
                ColumnInfo::new("v", 1, FieldType::Varchar),
            ],
        )
        .with_pk_handle(0)
    }

    fn allocator() -> RowIdAllocator {
        RowIdAllocator::new(Arc::new(MemoryCluster::new()))
    }

    fn record(a: i64, b: &str) -> Record {
        Record::new()
            .with_field("A", Datum::Int(a))
            .with_field("b", Datum::Str(b.to_string()))
    }

    #[tokio::test]
    async fn test_case_insensitive_projection() {
        let table = plain_table();
        let dataset = VecDataset::single(vec![record(1, "x")]);
        let rows = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.get(0), Some(&Datum::Int(1)));
        assert_eq!(rows[0].0.get(1), Some(&Datum::Str("x".to_string())));
    }

    #[tokio::test]
    async fn test_surrogate_handles_are_contiguous_in_input_order() {
        let table = plain_table();
        let dataset = VecDataset::new(vec![
            vec![record(1, "a"), record(2, "b")],
            vec![record(3, "c")],
        ]);
        let rows = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap();
        let handles: Vec<i64> = rows.iter().map(|(_, h)| h.as_i64()).collect();
        assert_eq!(handles, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_auto_increment_fill_in_input_order() {
        let table = auto_inc_table();
        let dataset = VecDataset::single(vec![
            Record::new().with_field("v", Datum::Str("x".to_string())),
            Record::new().with_field("v", Datum::Str("y".to_string())),
            Record::new().with_field("v", Datum::Str("z".to_string())),
        ]);
        let rows = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|(_, h)| h.as_i64()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        // The filled column and the handle agree.
        assert_eq!(rows[1].0.get(0), Some(&Datum::Int(1)));
    }

    #[tokio::test]
    async fn test_explicit_null_auto_increment_rejected() {
        let table = auto_inc_table();
        let dataset = VecDataset::single(vec![Record::new()
            .with_field("id", Datum::Null)
            .with_field("v", Datum::Str("x".to_string()))]);
        let err = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::NullAutoIncrement { .. }));
    }

    #[tokio::test]
    async fn test_arity_mismatch_rejected() {
        let table = plain_table();
        let dataset =
            VecDataset::single(vec![Record::new().with_field("a", Datum::Int(1))]);
        let err = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::ColumnCountMismatch { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let table = plain_table();
        let dataset = VecDataset::single(vec![Record::new()
            .with_field("a", Datum::Int(1))
            .with_field("nope", Datum::Int(2))]);
        let err = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_null_in_not_null_column_rejected() {
        let table = plain_table();
        let dataset = VecDataset::single(vec![Record::new()
            .with_field("a", Datum::Null)
            .with_field("b", Datum::Str("x".to_string()))]);
        let err = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::NullInNotNullColumn { .. }));
    }

    #[tokio::test]
    async fn test_pk_handle_from_column_value() {
        let mut table = plain_table();
        table = table.with_pk_handle(0);
        let dataset = VecDataset::single(vec![record(41, "x"), record(7, "y")]);
        let rows = normalize_and_assign(&table, &dataset, &allocator())
            .await
            .unwrap();
        let handles: Vec<i64> = rows.iter().map(|(_, h)| h.as_i64()).collect();
        assert_eq!(handles, vec![41, 7]);
    }
}
