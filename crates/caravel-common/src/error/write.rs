//! Batch-write error types.
//!
//! Provides error types for every stage of the write pipeline, from option
//! validation through two-phase commit.

use std::fmt;
use thiserror::Error;

use crate::types::{Key, Timestamp};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation timed out.
    Timeout = 0x0002,
    /// Stored bytes failed to decode.
    Corruption = 0x0003,

    // Configuration errors (0x0100 - 0x01FF)
    /// Batch writes are disabled.
    BatchWriteDisabled = 0x0100,
    /// Database not found in the catalog.
    DatabaseNotFound = 0x0101,
    /// Table not found in the catalog.
    TableNotFound = 0x0102,
    /// Table is partitioned.
    TablePartitioned = 0x0103,
    /// Table has generated columns.
    GeneratedColumns = 0x0104,
    /// Server does not support table locks.
    TableLockUnsupported = 0x0105,
    /// Server cleans stale table locks too aggressively.
    DelayCleanTableLockTooSmall = 0x0106,
    /// Invalid option value.
    InvalidConfig = 0x0107,

    // Validation errors (0x0200 - 0x02FF)
    /// Input column count does not match the table.
    ColumnCountMismatch = 0x0200,
    /// Null in a non-null column.
    NullInNotNullColumn = 0x0201,
    /// Null in the auto-increment column.
    NullAutoIncrement = 0x0202,
    /// Input field does not name a table column.
    UnknownColumn = 0x0203,
    /// Value cannot be converted to the declared column type.
    TypeMismatch = 0x0204,
    /// The primary-handle column is null.
    NullHandle = 0x0205,

    // Conflict errors (0x0300 - 0x03FF)
    /// Non-replace write collides with stored data.
    DataConflict = 0x0300,

    // Transaction errors (0x0400 - 0x04FF)
    /// Commit timestamp did not advance past the start timestamp.
    CommitTsNotAscending = 0x0400,
    /// Table schema changed during prewrite.
    SchemaChanged = 0x0401,
    /// Side channel closed before commit.
    SideChannelClosed = 0x0402,
    /// A key is locked by another transaction.
    KeyLocked = 0x0403,
    /// A newer committed version shadows the start timestamp.
    WriteConflict = 0x0404,
    /// Illegal commit state transition (bug).
    InvalidStateTransition = 0x0405,

    // External / allocation errors (0x0500 - 0x05FF)
    /// I/O error.
    Io = 0x0500,
    /// Remote service failure.
    Remote = 0x0501,
    /// Handle allocation lost too many CAS races.
    AllocatorContention = 0x0502,
    /// Handle space exhausted.
    AllocatorExhausted = 0x0503,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Configuration",
            0x02 => "Validation",
            0x03 => "Conflict",
            0x04 => "Transaction",
            0x05 => "External",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Caravel.
///
/// This enum covers all errors that can occur during a batch write. Each
/// variant includes relevant context for debugging. Failures before the
/// primary commit abort the transaction; see the two-phase commit driver
/// for which failures are swallowed afterwards.
#[derive(Debug, Error)]
pub enum CaravelError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Stored bytes failed to decode.
    #[error("corrupted encoding: {message}")]
    Corruption {
        /// Description of the malformed bytes.
        message: String,
    },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Batch writes are disabled in the write configuration.
    #[error("batch writes are disabled")]
    BatchWriteDisabled,

    /// Database not found.
    #[error("database '{database}' not found")]
    DatabaseNotFound {
        /// The missing database.
        database: String,
    },

    /// Table not found.
    #[error("table '{database}.{table}' not found")]
    TableNotFound {
        /// The database name.
        database: String,
        /// The missing table.
        table: String,
    },

    /// Writes to partitioned tables are rejected.
    #[error("table '{table}' is partitioned, batch write is not supported")]
    TablePartitioned {
        /// The partitioned table.
        table: String,
    },

    /// Writes to tables with generated columns are rejected.
    #[error("table '{table}' has generated columns, batch write is not supported")]
    GeneratedColumns {
        /// The offending table.
        table: String,
    },

    /// The server does not advertise table-lock support.
    #[error("server does not support table locks; enable allow_write_without_lock to proceed")]
    TableLockUnsupported,

    /// The server-side stale-lock cleaner delay is below the tolerated
    /// minimum.
    #[error("delay-clean-table-lock is {actual_ms}ms, below the required {min_ms}ms")]
    DelayCleanTableLockTooSmall {
        /// Configured server delay.
        actual_ms: u64,
        /// Minimum tolerated delay.
        min_ms: u64,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    /// Input column count does not match the table.
    #[error("column count mismatch: table expects {expected} (or {expected} - 1 with auto-increment), input has {actual}")]
    ColumnCountMismatch {
        /// Table column count.
        expected: usize,
        /// Input field count.
        actual: usize,
    },

    /// Null supplied for a non-null column.
    #[error("null value in non-null column '{column}'")]
    NullInNotNullColumn {
        /// The violated column.
        column: String,
    },

    /// Null supplied for the auto-increment column.
    #[error("null value in auto-increment column '{column}'")]
    NullAutoIncrement {
        /// The auto-increment column.
        column: String,
    },

    /// Input field does not name a table column.
    #[error("unknown column '{column}'")]
    UnknownColumn {
        /// The unmatched field name.
        column: String,
    },

    /// Value cannot be converted to the declared column type.
    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// The column name.
        column: String,
        /// Declared type.
        expected: String,
        /// Supplied value description.
        actual: String,
    },

    /// The primary-handle column is null.
    #[error("null value in primary-handle column '{column}'")]
    NullHandle {
        /// The handle column.
        column: String,
    },

    // ==========================================================================
    // Conflict Errors
    // ==========================================================================
    /// Non-replace write collides with stored data.
    #[error("{conflicts} input row(s) conflict with stored data and replace is disabled")]
    DataConflict {
        /// Number of conflicting rows discovered.
        conflicts: usize,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// The commit timestamp did not advance past the start timestamp.
    #[error("invalid transaction timestamps: commit_ts {commit_ts} <= start_ts {start_ts}")]
    CommitTsNotAscending {
        /// Transaction start timestamp.
        start_ts: Timestamp,
        /// Acquired commit timestamp.
        commit_ts: Timestamp,
    },

    /// The table schema changed between encoding and commit.
    #[error("schema of table '{table}' changed during write: update timestamp {was} -> {now}")]
    SchemaChanged {
        /// The table name.
        table: String,
        /// Update timestamp observed at the start of the write.
        was: i64,
        /// Update timestamp observed before commit.
        now: i64,
    },

    /// The side channel closed before the primary commit.
    #[error("side channel closed before commit")]
    SideChannelClosed,

    /// A key is locked by another transaction.
    #[error("key {key} locked by transaction starting at {lock_ts}")]
    KeyLocked {
        /// The locked key.
        key: Key,
        /// Start timestamp of the lock owner.
        lock_ts: Timestamp,
    },

    /// A committed version newer than `start_ts` shadows the write.
    #[error("write conflict on key {key}: committed at {committed_ts}, write started at {start_ts}")]
    WriteConflict {
        /// The conflicting key.
        key: Key,
        /// Timestamp of the shadowing commit.
        committed_ts: Timestamp,
        /// Start timestamp of this write.
        start_ts: Timestamp,
    },

    /// Illegal commit state transition (bug in the driver).
    #[error("invalid commit state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    // ==========================================================================
    // External Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Remote service failure, with the failing service named.
    #[error("{service} error: {message}")]
    Remote {
        /// Which collaborator failed ("kv", "pd", "meta", "side-channel").
        service: &'static str,
        /// Failure description, cause preserved in text.
        message: String,
    },

    /// Handle allocation lost too many CAS races against other writers.
    #[error("row-id allocation lost {attempts} races, giving up")]
    AllocatorContention {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Handle space exhausted.
    #[error("row-id space exhausted: cannot reserve {step} ids past {current}")]
    AllocatorExhausted {
        /// Current high-water mark.
        current: u64,
        /// Requested range size.
        step: u64,
    },
}

impl CaravelError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::BatchWriteDisabled => ErrorCode::BatchWriteDisabled,
            Self::DatabaseNotFound { .. } => ErrorCode::DatabaseNotFound,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::TablePartitioned { .. } => ErrorCode::TablePartitioned,
            Self::GeneratedColumns { .. } => ErrorCode::GeneratedColumns,
            Self::TableLockUnsupported => ErrorCode::TableLockUnsupported,
            Self::DelayCleanTableLockTooSmall { .. } => ErrorCode::DelayCleanTableLockTooSmall,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::ColumnCountMismatch { .. } => ErrorCode::ColumnCountMismatch,
            Self::NullInNotNullColumn { .. } => ErrorCode::NullInNotNullColumn,
            Self::NullAutoIncrement { .. } => ErrorCode::NullAutoIncrement,
            Self::UnknownColumn { .. } => ErrorCode::UnknownColumn,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::NullHandle { .. } => ErrorCode::NullHandle,
            Self::DataConflict { .. } => ErrorCode::DataConflict,
            Self::CommitTsNotAscending { .. } => ErrorCode::CommitTsNotAscending,
            Self::SchemaChanged { .. } => ErrorCode::SchemaChanged,
            Self::SideChannelClosed => ErrorCode::SideChannelClosed,
            Self::KeyLocked { .. } => ErrorCode::KeyLocked,
            Self::WriteConflict { .. } => ErrorCode::WriteConflict,
            Self::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::Io { .. } => ErrorCode::Io,
            Self::Remote { .. } => ErrorCode::Remote,
            Self::AllocatorContention { .. } => ErrorCode::AllocatorContention,
            Self::AllocatorExhausted { .. } => ErrorCode::AllocatorExhausted,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::KeyLocked { .. } | Self::AllocatorContention { .. }
        )
    }

    /// Returns true if this error represents a data or transaction conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DataConflict { .. } | Self::WriteConflict { .. } | Self::KeyLocked { .. }
        )
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a remote-service error with its cause rendered into the
    /// message.
    #[must_use]
    pub fn remote(service: &'static str, cause: impl fmt::Display) -> Self {
        Self::Remote {
            service,
            message: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = CaravelError::TableNotFound {
            database: "test".to_string(),
            table: "t".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::TableNotFound);
        assert_eq!(err.code().category(), "Configuration");
    }

    #[test]
    fn test_error_display() {
        let err = CaravelError::DataConflict { conflicts: 3 };
        assert_eq!(
            err.to_string(),
            "3 input row(s) conflict with stored data and replace is disabled"
        );
    }

    #[test]
    fn test_retryable() {
        let locked = CaravelError::KeyLocked {
            key: Key::from_bytes(b"k"),
            lock_ts: Timestamp::from_version(7),
        };
        assert!(locked.is_retryable());
        assert!(!CaravelError::BatchWriteDisabled.is_retryable());
    }

    #[test]
    fn test_conflict() {
        let err = CaravelError::DataConflict { conflicts: 1 };
        assert!(err.is_conflict());
        assert!(!CaravelError::SideChannelClosed.is_conflict());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CaravelError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }

    #[test]
    fn test_category_bands() {
        assert_eq!(ErrorCode::ColumnCountMismatch.category(), "Validation");
        assert_eq!(ErrorCode::SchemaChanged.category(), "Transaction");
        assert_eq!(ErrorCode::Remote.category(), "External");
    }
}
