//! # caravel-common
//!
//! Common types, errors, and configuration for Caravel.
//!
//! This crate provides the foundational types and abstractions used across
//! all Caravel components. It includes:
//!
//! - **Types**: Core identifiers (`TableId`, `Handle`, `RegionId`), keys,
//!   values, and oracle timestamps
//! - **Schema**: Catalog descriptors for tables, columns, and indices
//! - **Errors**: Unified error handling with `CaravelError`
//! - **Config**: Batch-write configuration
//! - **Constants**: System-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use caravel_common::types::{TableId, Handle, Key, Value};
//! use caravel_common::error::CaravelResult;
//!
//! fn example() -> CaravelResult<()> {
//!     let table_id = TableId::new(42);
//!     let handle = Handle::new(1);
//!     let key = Key::from_bytes(b"hello");
//!     let value = Value::from_bytes(b"world");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod schema;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::WriteConfig;
pub use constants::*;
pub use error::{CaravelError, CaravelResult};
pub use schema::{ColumnInfo, FieldType, IndexInfo, TableInfo};
pub use types::{DatabaseId, Handle, IndexId, Key, KvPair, RegionId, TableId, Timestamp, Value};
