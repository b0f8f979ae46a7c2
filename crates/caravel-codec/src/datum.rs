//! Datum value model and type canonicalization.
//!
//! A `Datum` is one cell of an internal row. Input records arrive with
//! whatever types the compute engine produced; `Datum::canonicalize`
//! converts each cell to the table's declared column type, so the rest of
//! the pipeline never sees a mixed-width integer or a stray string where
//! bytes were declared.

use bytes::Bytes;
use std::fmt;

use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::{ColumnInfo, FieldType};

/// One cell of an internal row.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer, canonical form for the signed integer family.
    Int(i64),
    /// Unsigned 64-bit integer.
    UInt(u64),
    /// Double-precision float, canonical form for both float widths.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Bytes),
}

impl Datum {
    /// Returns true for `Null`.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the datum the way the store's string conversion would.
    ///
    /// Used for index-split bounds, which the side channel takes as strings.
    #[must_use]
    pub fn to_split_bound(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => (i64::from(*b)).to_string(),
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Converts this datum to the declared type of `column`.
    ///
    /// Nullability is not checked here; the normalizer owns that rule.
    pub fn canonicalize(self, column: &ColumnInfo) -> CaravelResult<Self> {
        let mismatch = |actual: &Self| CaravelError::TypeMismatch {
            column: column.name.clone(),
            expected: column.field_type.to_string(),
            actual: format!("{actual:?}"),
        };

        if self.is_null() {
            return Ok(Self::Null);
        }

        match column.field_type {
            FieldType::Boolean => match self {
                Self::Bool(b) => Ok(Self::Bool(b)),
                Self::Int(0) => Ok(Self::Bool(false)),
                Self::Int(_) => Ok(Self::Bool(true)),
                other => Err(mismatch(&other)),
            },
            FieldType::TinyInt | FieldType::SmallInt | FieldType::Int | FieldType::BigInt => {
                let v = match self {
                    Self::Int(i) => i,
                    Self::UInt(u) if u <= i64::MAX as u64 => u as i64,
                    Self::Bool(b) => i64::from(b),
                    other => return Err(mismatch(&other)),
                };
                let fits = match column.field_type {
                    FieldType::TinyInt => i8::try_from(v).is_ok(),
                    FieldType::SmallInt => i16::try_from(v).is_ok(),
                    FieldType::Int => i32::try_from(v).is_ok(),
                    _ => true,
                };
                if fits {
                    Ok(Self::Int(v))
                } else {
                    Err(mismatch(&Self::Int(v)))
                }
            }
            FieldType::UnsignedBigInt => match self {
                Self::UInt(u) => Ok(Self::UInt(u)),
                Self::Int(i) if i >= 0 => Ok(Self::UInt(i as u64)),
                other => Err(mismatch(&other)),
            },
            FieldType::Float | FieldType::Double => match self {
                Self::Float(f) => Ok(Self::Float(f)),
                Self::Int(i) => Ok(Self::Float(i as f64)),
                Self::UInt(u) => Ok(Self::Float(u as f64)),
                other => Err(mismatch(&other)),
            },
            FieldType::Varchar => match self {
                Self::Str(s) => Ok(Self::Str(s)),
                other => Err(mismatch(&other)),
            },
            FieldType::Blob => match self {
                Self::Bytes(b) => Ok(Self::Bytes(b)),
                Self::Str(s) => Ok(Self::Bytes(Bytes::from(s.into_bytes()))),
                other => Err(mismatch(&other)),
            },
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "{} bytes", b.len()),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// A fixed-width internal row, indexed by column offset.
///
/// Sized to the table at construction; every cell is canonicalized to its
/// column's declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Datum>);

impl Row {
    /// Creates a row of `width` NULLs.
    #[must_use]
    pub fn nulls(width: usize) -> Self {
        Self(vec![Datum::Null; width])
    }

    /// Creates a row from cells already in column order.
    #[must_use]
    pub fn from_datums(datums: Vec<Datum>) -> Self {
        Self(datums)
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.0.len()
    }

    /// Returns the cell at `offset`.
    #[inline]
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<&Datum> {
        self.0.get(offset)
    }

    /// Replaces the cell at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of bounds; rows are sized to the table at
    /// construction.
    pub fn set(&mut self, offset: usize, datum: Datum) {
        self.0[offset] = datum;
    }

    /// Iterates the cells in column order.
    pub fn datums(&self) -> impl Iterator<Item = &Datum> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(ft: FieldType) -> ColumnInfo {
        ColumnInfo::new("c", 0, ft)
    }

    #[test]
    fn test_canonicalize_widens_integers() {
        let d = Datum::Int(7).canonicalize(&column(FieldType::BigInt)).unwrap();
        assert_eq!(d, Datum::Int(7));
        let d = Datum::UInt(7).canonicalize(&column(FieldType::BigInt)).unwrap();
        assert_eq!(d, Datum::Int(7));
    }

    #[test]
    fn test_canonicalize_range_checks() {
        assert!(Datum::Int(300).canonicalize(&column(FieldType::TinyInt)).is_err());
        assert!(Datum::Int(300).canonicalize(&column(FieldType::SmallInt)).is_ok());
        assert!(Datum::Int(-1).canonicalize(&column(FieldType::UnsignedBigInt)).is_err());
    }

    #[test]
    fn test_canonicalize_null_passes() {
        let d = Datum::Null.canonicalize(&column(FieldType::Varchar)).unwrap();
        assert!(d.is_null());
    }

    #[test]
    fn test_canonicalize_string_to_blob() {
        let d = Datum::Str("ab".to_string())
            .canonicalize(&column(FieldType::Blob))
            .unwrap();
        assert_eq!(d, Datum::Bytes(Bytes::from_static(b"ab")));
    }

    #[test]
    fn test_canonicalize_rejects_cross_kind() {
        assert!(Datum::Str("x".to_string())
            .canonicalize(&column(FieldType::BigInt))
            .is_err());
    }

    #[test]
    fn test_row_set_get() {
        let mut row = Row::nulls(2);
        row.set(1, Datum::Int(5));
        assert!(row.get(0).unwrap().is_null());
        assert_eq!(row.get(1), Some(&Datum::Int(5)));
        assert_eq!(row.width(), 2);
    }
}
