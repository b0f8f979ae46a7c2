//! Core identifier types for Caravel.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types. Catalog identifiers
//! (`DatabaseId`, `TableId`, `IndexId`) are signed 64-bit values assigned by
//! the target store's catalog; `Handle` is the per-table 64-bit row
//! identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! catalog_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates a new identifier from a raw i64 value.
            #[inline]
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw i64 value.
            #[inline]
            #[must_use]
            pub const fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            #[inline]
            fn from(id: i64) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for i64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

catalog_id! {
    /// Database identifier assigned by the catalog.
    DatabaseId
}

catalog_id! {
    /// Table identifier assigned by the catalog.
    ///
    /// Table IDs prefix every row and index key the codec produces, so all
    /// of a table's data occupies one contiguous keyspace slice.
    TableId
}

catalog_id! {
    /// Index identifier, unique within its table.
    IndexId
}

/// Region identifier assigned by the placement driver.
///
/// A region owns one contiguous keyspace range; see `caravel-store` for
/// routing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RegionId(u64);

impl RegionId {
    /// Creates a new region ID from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionId({})", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The 64-bit row identifier within a table.
///
/// Either the primary-key column's value (when the table's primary key is
/// the handle) or a surrogate reserved from the meta service. Handles are
/// signed: a table whose handle column is declared unsigned still stores the
/// bit pattern as i64 and relies on the codec's order-preserving encoding.
///
/// # Example
///
/// ```rust
/// use caravel_common::types::Handle;
///
/// let h = Handle::new(41);
/// assert_eq!(h.next(), Handle::new(42));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Handle(i64);

impl Handle {
    /// The zero handle.
    pub const ZERO: Self = Self(0);

    /// Maximum handle value.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a new handle from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next handle.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns this handle offset by `n`.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: i64) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// Converts to bytes (big-endian, sign preserved).
    #[inline]
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Creates a handle from bytes (big-endian, sign preserved).
    #[inline]
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_be_bytes(bytes))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Handle {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl From<Handle> for i64 {
    #[inline]
    fn from(id: Handle) -> Self {
        id.0
    }
}
