//! Core types for Caravel.

mod ids;
mod keys;
mod timestamps;

pub use ids::{DatabaseId, Handle, IndexId, RegionId, TableId};
pub use keys::{Key, KvPair, Value};
pub use timestamps::Timestamp;
