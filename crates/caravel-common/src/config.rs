//! Batch-write configuration.
//!
//! One `WriteConfig` governs a single `write` call. Defaults are safe for
//! production loads; `for_testing()` trades safety for speed.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_LOCK_TTL_SECONDS, DEFAULT_SNAPSHOT_BATCH_GET_SIZE, DEFAULT_SPLIT_SIZE_MB,
    HANDLE_SPREAD_PER_REGION,
};
use crate::error::{CaravelError, CaravelResult};

/// Options for one batch write.
///
/// # Example
///
/// ```rust
/// use caravel_common::config::WriteConfig;
///
/// let config = WriteConfig::default().with_replace(true).with_write_concurrency(8);
/// assert!(config.replace);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Master switch; a disabled writer rejects every call.
    pub enabled: bool,

    /// Overwrite on conflict instead of failing.
    pub replace: bool,

    /// Attempt a table write-lock over the side channel before encoding.
    pub use_table_lock: bool,

    /// Proceed without the table lock when the server cannot grant one.
    pub allow_write_without_lock: bool,

    /// Emit region pre-split hints before writing.
    pub enable_region_split: bool,

    /// Explicit split count; 0 estimates from data size.
    pub region_split_num: u32,

    /// Handle spread expected per region by the table-split guard.
    pub handle_spread_per_region: i64,

    /// Region size used to estimate split counts, in megabytes.
    pub split_size_mb: u64,

    /// Partition cap for the secondary prewrite/commit phases.
    /// Zero or negative uses one partition per region.
    pub write_concurrency: i32,

    /// Per-request batch size for conflict-detection snapshot reads.
    pub snapshot_batch_get_size: usize,

    /// Skip the secondary-commit phase entirely.
    pub skip_commit_secondary_keys: bool,

    /// Keep the primary lock alive with TTL heartbeats during long writes.
    /// Requires a store that supports online TTL refresh (server >= 3.0.5).
    pub ttl_update_enabled: bool,

    /// Initial per-lock TTL in seconds.
    pub lock_ttl_seconds: u64,

    /// Side-channel endpoint, e.g. `"store://coordinator:4000"`.
    pub url: String,

    /// Propagate side-channel and split errors instead of swallowing them.
    pub is_test: bool,

    /// Test-only pause after the primary prewrite, in milliseconds.
    pub sleep_after_prewrite_primary_ms: u64,

    /// Test-only pause after the secondary prewrite fan-out, in milliseconds.
    pub sleep_after_prewrite_secondary_ms: u64,

    /// Test-only pause after acquiring the commit timestamp, in milliseconds.
    pub sleep_after_get_commit_ts_ms: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replace: false,
            use_table_lock: false,
            allow_write_without_lock: false,
            enable_region_split: false,
            region_split_num: 0,
            handle_spread_per_region: HANDLE_SPREAD_PER_REGION,
            split_size_mb: DEFAULT_SPLIT_SIZE_MB,
            write_concurrency: 0,
            snapshot_batch_get_size: DEFAULT_SNAPSHOT_BATCH_GET_SIZE,
            skip_commit_secondary_keys: false,
            ttl_update_enabled: false,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            url: String::new(),
            is_test: false,
            sleep_after_prewrite_primary_ms: 0,
            sleep_after_prewrite_secondary_ms: 0,
            sleep_after_get_commit_ts_ms: 0,
        }
    }
}

impl WriteConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration for tests: replace on, tiny batches, errors
    /// propagated.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            replace: true,
            snapshot_batch_get_size: 4,
            lock_ttl_seconds: 5,
            is_test: true,
            ..Default::default()
        }
    }

    /// Sets replace-on-conflict.
    #[must_use]
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Sets the table-lock option.
    #[must_use]
    pub fn with_table_lock(mut self, use_table_lock: bool) -> Self {
        self.use_table_lock = use_table_lock;
        self
    }

    /// Sets the secondary-phase partition cap.
    #[must_use]
    pub fn with_write_concurrency(mut self, write_concurrency: i32) -> Self {
        self.write_concurrency = write_concurrency;
        self
    }

    /// Enables region pre-splitting with an explicit split count.
    #[must_use]
    pub fn with_region_split(mut self, region_split_num: u32) -> Self {
        self.enable_region_split = true;
        self.region_split_num = region_split_num;
        self
    }

    /// Sets the snapshot batch-get size.
    #[must_use]
    pub fn with_snapshot_batch_get_size(mut self, size: usize) -> Self {
        self.snapshot_batch_get_size = size;
        self
    }

    /// Enables primary-lock TTL keep-alive.
    #[must_use]
    pub fn with_ttl_update(mut self, lock_ttl_seconds: u64) -> Self {
        self.ttl_update_enabled = true;
        self.lock_ttl_seconds = lock_ttl_seconds;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CaravelResult<()> {
        if self.snapshot_batch_get_size == 0 {
            return Err(CaravelError::invalid_config(
                "snapshot_batch_get_size must be positive",
            ));
        }
        if self.lock_ttl_seconds == 0 {
            return Err(CaravelError::invalid_config(
                "lock_ttl_seconds must be positive",
            ));
        }
        if self.handle_spread_per_region <= 0 {
            return Err(CaravelError::invalid_config(
                "handle_spread_per_region must be positive",
            ));
        }
        if self.split_size_mb == 0 {
            return Err(CaravelError::invalid_config(
                "split_size_mb must be positive",
            ));
        }
        Ok(())
    }

    /// The initial lock TTL in milliseconds, as passed to prewrite calls.
    #[inline]
    #[must_use]
    pub const fn lock_ttl_ms(&self) -> u64 {
        self.lock_ttl_seconds * 1_000
    }
}
