//! Catalog descriptors for tables, columns, and indices.
//!
//! These mirror what the target store's catalog serves. A descriptor is read
//! once per write and treated as immutable for the duration; the
//! `update_timestamp` field is the schema-change guard's version stamp.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{DatabaseId, IndexId, TableId};

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    TinyInt,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit unsigned integer.
    UnsignedBigInt,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    Varchar,
    /// Raw bytes.
    Blob,
}

impl FieldType {
    /// Returns true for the signed integer family.
    #[must_use]
    pub const fn is_signed_integer(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt
        )
    }

    /// Returns true for any integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        self.is_signed_integer() || matches!(self, Self::UnsignedBigInt)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::UnsignedBigInt => "BIGINT UNSIGNED",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::Blob => "BLOB",
        };
        write!(f, "{name}")
    }
}

/// One column of a table descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as declared.
    pub name: String,
    /// Position in the table's column order.
    pub offset: usize,
    /// Declared type.
    pub field_type: FieldType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this is the table's auto-increment column.
    pub auto_increment: bool,
    /// Whether this column's value is generated from an expression.
    pub generated: bool,
}

impl ColumnInfo {
    /// Creates a nullable, non-auto-increment column.
    #[must_use]
    pub fn new(name: impl Into<String>, offset: usize, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            offset,
            field_type,
            nullable: true,
            auto_increment: false,
            generated: false,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Marks the column generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }
}

/// One index of a table descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index identifier, unique within the table.
    pub index_id: IndexId,
    /// Index name as declared.
    pub name: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Column offsets of the indexed columns, in index order.
    pub column_offsets: Vec<usize>,
}

impl IndexInfo {
    /// Creates an index descriptor.
    #[must_use]
    pub fn new(
        index_id: IndexId,
        name: impl Into<String>,
        unique: bool,
        column_offsets: Vec<usize>,
    ) -> Self {
        Self {
            index_id,
            name: name.into(),
            unique,
            column_offsets,
        }
    }
}

/// A table descriptor as served by the catalog.
///
/// Immutable for the duration of one write. The two rejection predicates
/// (`is_partitioned`, `has_generated_columns`) gate the writer up front and
/// are the extension points for lifting those restrictions later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Owning database.
    pub database_id: DatabaseId,
    /// Table identifier; prefixes every encoded key.
    pub table_id: TableId,
    /// Table name as declared.
    pub name: String,
    /// Schema version stamp; advances on any DDL touching the table.
    pub update_timestamp: i64,
    /// Columns in declared order; `columns[i].offset == i`.
    pub columns: Vec<ColumnInfo>,
    /// Indices on the table.
    pub indices: Vec<IndexInfo>,
    /// Whether the primary key column doubles as the row handle.
    pub pk_is_handle: bool,
    /// Offset of the handle column when `pk_is_handle`.
    pub handle_offset: Option<usize>,
    /// Whether the table is partitioned.
    pub partitioned: bool,
}

impl TableInfo {
    /// Creates a descriptor with no indices.
    #[must_use]
    pub fn new(
        database_id: DatabaseId,
        table_id: TableId,
        name: impl Into<String>,
        columns: Vec<ColumnInfo>,
    ) -> Self {
        Self {
            database_id,
            table_id,
            name: name.into(),
            update_timestamp: 1,
            columns,
            indices: Vec::new(),
            pk_is_handle: false,
            handle_offset: None,
            partitioned: false,
        }
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indices.push(index);
        self
    }

    /// Declares the column at `offset` as the primary-key handle.
    #[must_use]
    pub fn with_pk_handle(mut self, offset: usize) -> Self {
        self.pk_is_handle = true;
        self.handle_offset = Some(offset);
        self
    }

    /// Marks the table partitioned.
    #[must_use]
    pub fn partitioned(mut self) -> Self {
        self.partitioned = true;
        self
    }

    /// Number of declared columns.
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the auto-increment column, if any.
    #[must_use]
    pub fn auto_increment_column(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Returns the handle column when `pk_is_handle`.
    #[must_use]
    pub fn handle_column(&self) -> Option<&ColumnInfo> {
        self.handle_offset.and_then(|o| self.columns.get(o))
    }

    /// Returns the unique indices.
    pub fn unique_indices(&self) -> impl Iterator<Item = &IndexInfo> {
        self.indices.iter().filter(|i| i.unique)
    }

    /// Whether the table is partitioned.
    #[inline]
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// Whether any column is generated.
    #[must_use]
    pub fn has_generated_columns(&self) -> bool {
        self.columns.iter().any(|c| c.generated)
    }

    /// Whether conflicts are possible at all for this table.
    ///
    /// A table with neither a pk-handle nor unique indices cannot collide
    /// with stored rows: surrogate handles are freshly reserved, and
    /// non-unique indices never conflict.
    #[must_use]
    pub fn constraint_check_needed(&self) -> bool {
        self.pk_is_handle || self.unique_indices().next().is_some()
    }
}
