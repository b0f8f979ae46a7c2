//! # caravel-writer
//!
//! The batch-write pipeline. One [`BatchWriter::write`] call ingests a
//! partitioned dataset and commits it atomically into the target store as a
//! single percolator transaction:
//!
//! ```text
//! records -> normalize -> handles -> dedup -> conflicts -> expand
//!         -> merge (put masks delete) -> partition by region -> 2PC
//! ```
//!
//! The stages:
//!
//! - [`normalize`]: project named fields onto the table's column order,
//!   fill the auto-increment column from a reserved range
//! - [`dedup`]: collapse duplicate row keys and unique-index keys within
//!   the input
//! - [`conflict`]: probe a snapshot at `start_ts` for stored rows that
//!   collide with the input; replace or reject
//! - [`expand`]: produce one row KV and K index KVs per row, and merge
//!   input puts over conflict deletes
//! - [`partition`]: route pairs to write partitions by owning region
//! - [`twopc`]: primary prewrite, secondary fan-out, primary commit,
//!   best-effort secondary commit, with TTL keep-alive on the primary lock
//! - [`split`]: optional fire-and-forget region pre-split hints
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use caravel_writer::{BatchWriter, WriteTarget, dataset::{Record, VecDataset}};
//! # use caravel_common::WriteConfig;
//! # use caravel_codec::Datum;
//! # async fn example(writer: BatchWriter) -> caravel_common::CaravelResult<()> {
//! let dataset = VecDataset::single(vec![
//!     Record::new().with_field("a", Datum::Int(1)).with_field("b", Datum::Int(2)),
//! ]);
//! let target = WriteTarget::new("app", "events");
//! let summary = writer.write(&dataset, &target, &WriteConfig::default()).await?;
//! assert_eq!(summary.rows_written, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod conflict;
pub mod dataset;
pub mod dedup;
pub mod expand;
pub mod normalize;
pub mod partition;
pub mod split;
pub mod twopc;
pub mod writer;

pub use dataset::{Dataset, Record, VecDataset};
pub use writer::{BatchWriter, WriteSummary, WriteTarget};
