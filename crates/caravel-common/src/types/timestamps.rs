//! Oracle timestamp type for Caravel.
//!
//! The placement driver's timestamp oracle vends monotonic versions that
//! pack physical milliseconds with a logical counter, so a single oracle can
//! hand out many distinct timestamps per millisecond while the whole stream
//! stays totally ordered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits reserved for the logical counter.
const LOGICAL_BITS: u32 = 18;

/// A timestamp from the placement driver's oracle.
///
/// Layout of the packed 64-bit version:
/// - high 46 bits: physical time, milliseconds since Unix epoch
/// - low 18 bits: logical counter within the millisecond
///
/// Transactions are bracketed by two of these: `start_ts` (snapshot reads
/// and prewrite) and `commit_ts` (commit), with `commit_ts > start_ts`
/// required on every successful write.
///
/// # Example
///
/// ```rust
/// use caravel_common::types::Timestamp;
///
/// let ts = Timestamp::compose(1_700_000_000_000, 7);
/// assert_eq!(ts.physical_ms(), 1_700_000_000_000);
/// assert_eq!(ts.logical(), 7);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp, before every real version.
    pub const ZERO: Self = Self(0);

    /// The maximum timestamp, after every real version.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from a raw packed version.
    #[inline]
    #[must_use]
    pub const fn from_version(version: u64) -> Self {
        Self(version)
    }

    /// Packs physical milliseconds and a logical counter into a version.
    #[inline]
    #[must_use]
    pub const fn compose(physical_ms: u64, logical: u64) -> Self {
        Self((physical_ms << LOGICAL_BITS) | (logical & ((1 << LOGICAL_BITS) - 1)))
    }

    /// Returns the raw packed version.
    #[inline]
    #[must_use]
    pub const fn version(self) -> u64 {
        self.0
    }

    /// Returns the physical component in milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn physical_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Returns the logical counter within the millisecond.
    #[inline]
    #[must_use]
    pub const fn logical(self) -> u64 {
        self.0 & ((1 << LOGICAL_BITS) - 1)
    }

    /// Checks if this is the zero timestamp.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}.{})", self.physical_ms(), self.logical())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.physical_ms();
        if ms > 0 && ms < i64::MAX as u64 {
            let secs = (ms / 1000) as i64;
            let subsec_ms = (ms % 1000) as u32;
            if let Some(dt) = chrono::DateTime::from_timestamp(secs, subsec_ms * 1_000_000) {
                return write!(f, "{}+{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ"), self.logical());
            }
        }
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(version: u64) -> Self {
        Self::from_version(version)
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_round_trip() {
        let ts = Timestamp::compose(1_700_000_000_000, 123);
        assert_eq!(ts.physical_ms(), 1_700_000_000_000);
        assert_eq!(ts.logical(), 123);
    }

    #[test]
    fn test_ordering_physical_then_logical() {
        let a = Timestamp::compose(10, 5);
        let b = Timestamp::compose(10, 6);
        let c = Timestamp::compose(11, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_logical_masked() {
        // A logical counter wider than 18 bits must not bleed into the
        // physical component.
        let ts = Timestamp::compose(1, u64::MAX);
        assert_eq!(ts.physical_ms(), 1);
    }
}
