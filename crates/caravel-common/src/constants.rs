//! System-wide constants for Caravel.
//!
//! This module defines constants used across the batch-write pipeline.
//! The timing constants around table locking are load-bearing: the primary
//! commit must complete before the server's stale table-lock cleaner would
//! release the lock out from under us.

// =============================================================================
// Table Lock Timing
// =============================================================================

/// Minimum tolerated value of the server-side `delay-clean-table-lock`
/// setting, in milliseconds.
///
/// If the server is configured to clean stale table locks sooner than this,
/// a slow primary commit could race the cleaner and Caravel refuses to write.
pub const MIN_DELAY_CLEAN_TABLE_LOCK_MS: u64 = 60_000;

/// Safety margin between the stale-lock cleaner delay and the primary-commit
/// backoff budget, in milliseconds.
pub const DELAY_CLEAN_TABLE_LOCK_COMMIT_BACKOFF_DELTA_MS: u64 = 30_000;

/// Total backoff budget for committing the primary key, in milliseconds.
///
/// Derived so that the primary commit gives up before the server's
/// stale-lock cleaner could fire: `MIN_DELAY_CLEAN_TABLE_LOCK_MS -
/// DELAY_CLEAN_TABLE_LOCK_COMMIT_BACKOFF_DELTA_MS`.
pub const PRIMARY_KEY_COMMIT_BACKOFF_MS: u64 =
    MIN_DELAY_CLEAN_TABLE_LOCK_MS - DELAY_CLEAN_TABLE_LOCK_COMMIT_BACKOFF_DELTA_MS;

/// Total backoff budget for batch prewrite requests, in milliseconds.
pub const BATCH_PREWRITE_BACKOFF_MS: u64 = 20_000;

// =============================================================================
// Lock TTL
// =============================================================================

/// Default per-lock TTL in seconds.
pub const DEFAULT_LOCK_TTL_SECONDS: u64 = 3_600;

/// Ceiling on the TTL the keep-alive task will request, in milliseconds.
///
/// Bounds the lifetime of a stale primary lock if the coordinator hangs
/// after a refresh.
pub const MAX_TTL_REFRESH_MS: u64 = 600_000;

/// The keep-alive pings the primary lock every `ttl / TTL_HEARTBEAT_DIVISOR`.
pub const TTL_HEARTBEAT_DIVISOR: u32 = 3;

// =============================================================================
// Snapshot Reads
// =============================================================================

/// Default per-request batch size for snapshot `batch_get` probes.
pub const DEFAULT_SNAPSHOT_BATCH_GET_SIZE: usize = 20_480;

// =============================================================================
// Region Split Heuristics
// =============================================================================

/// Expected handle spread per region used by the table-split guard.
///
/// A split hint is only sent when `max_handle - min_handle` exceeds
/// `region_split_num * HANDLE_SPREAD_PER_REGION`. The value is empirical.
pub const HANDLE_SPREAD_PER_REGION: i64 = 1_000;

/// Default region size used to estimate a split count from total bytes, in
/// megabytes.
pub const DEFAULT_SPLIT_SIZE_MB: u64 = 96;

// =============================================================================
// Handle Allocation
// =============================================================================

/// Maximum CAS attempts against the meta service before giving up.
pub const MAX_ROW_ID_ALLOC_RETRIES: u32 = 10;

/// Base backoff between contended allocation attempts, in milliseconds.
/// Doubles per attempt, with jitter.
pub const ROW_ID_ALLOC_BACKOFF_BASE_MS: u64 = 2;

/// Cap on a single allocation backoff sleep, in milliseconds.
pub const ROW_ID_ALLOC_BACKOFF_CAP_MS: u64 = 1_000;
