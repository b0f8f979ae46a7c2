//! # caravel-codec
//!
//! Key/value codec for the target store's on-disk row format.
//!
//! Everything above this crate treats keys and values as opaque byte
//! strings; everything below (the store itself) expects the exact encoding
//! produced here. The format is bit-compatible with what the store's own
//! writers produce, so rows loaded by Caravel are indistinguishable from
//! rows written through the store's SQL front end:
//!
//! - **Row keys**: `t | table_id | _r | handle`, ids in order-preserving
//!   sign-flipped big-endian
//! - **Index keys**: `t | table_id | _i | index_id | datums...`, with the
//!   handle appended for non-unique indices
//! - **Row values**: column-count header plus per-column tagged datums
//! - **Unique index values**: the 8-byte big-endian signed handle
//! - **Non-unique index values**: the single byte `'0'`
//!
//! All key encodings are memcomparable: byte order equals logical order, so
//! region routing never decodes a key.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod comparable;
pub mod datum;
pub mod key;
pub mod value;

pub use datum::{Datum, Row};
pub use key::{
    decode_row_key_handle, encode_non_unique_index_key, encode_row_key, encode_unique_index_key,
    index_prefix, row_prefix, table_prefix,
};
pub use value::{
    decode_handle_from_unique_index, decode_row_value, encode_handle_value, encode_row_value,
    non_unique_index_value,
};
