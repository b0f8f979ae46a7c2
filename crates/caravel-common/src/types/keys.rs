//! Key and value types for Caravel.
//!
//! Byte wrappers for encoded keys and values. Keys compare bytewise, which
//! matches the store's region boundaries: every codec encoding is
//! order-preserving, so routing a `Key` is a pure byte comparison. An empty
//! `Value` is the delete sentinel throughout the pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

/// An encoded store key.
///
/// Keys are opaque byte strings above the codec layer. Their bytewise order
/// is total and compatible with region boundaries.
///
/// # Example
///
/// ```rust
/// use caravel_common::types::Key;
///
/// let key = Key::from_bytes(b"t\x80\x00\x00\x00\x00\x00\x00\x01_r");
/// assert!(key.starts_with(b"t"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(Bytes);

impl Key {
    /// Creates an empty key.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Creates a key from a byte slice.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Creates a key from owned bytes.
    #[inline]
    #[must_use]
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }

    /// Returns the length of the key in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    ///
    /// An empty key is the unbounded region boundary, not a real row key.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the key as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if this key starts with the given prefix.
    #[inline]
    #[must_use]
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Returns the smallest key strictly greater than this one.
    #[must_use]
    pub fn successor(&self) -> Self {
        let mut bytes = self.0.to_vec();

        // Find the rightmost byte that is not 0xFF
        for i in (0..bytes.len()).rev() {
            if bytes[i] < 0xFF {
                bytes[i] += 1;
                bytes.truncate(i + 1);
                return Self::from_vec(bytes);
            }
        }

        // All bytes are 0xFF, append 0x00
        bytes.push(0x00);
        Self::from_vec(bytes)
    }
}

impl Deref for Key {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Key {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Ord for Key {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Key {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(0x")?;
        for byte in &self.0[..self.0.len().min(32)] {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 32 {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..self.0.len().min(32)] {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 32 {
            write!(f, "...")?;
        }
        Ok(())
    }
}

impl From<Vec<u8>> for Key {
    #[inline]
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

impl From<&[u8]> for Key {
    #[inline]
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// An encoded store value.
///
/// The empty value is the delete sentinel: a KV pair with an empty value
/// deletes its key when committed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Bytes);

impl Value {
    /// Creates an empty value (the delete sentinel).
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Creates a value from a byte slice.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Creates a value from owned bytes.
    #[inline]
    #[must_use]
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }

    /// Returns the length of the value in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if this value marks a delete.
    #[inline]
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Value {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Value {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_delete() {
            write!(f, "Value(delete)")
        } else {
            write!(f, "Value({} bytes)", self.0.len())
        }
    }
}

impl From<Vec<u8>> for Value {
    #[inline]
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

impl From<&[u8]> for Value {
    #[inline]
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// A key/value pair flowing through the write pipeline.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KvPair {
    /// The encoded key.
    pub key: Key,
    /// The encoded value; empty means delete.
    pub value: Value,
}

impl KvPair {
    /// Creates a new pair.
    #[inline]
    #[must_use]
    pub const fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Creates a delete pair for `key`.
    #[inline]
    #[must_use]
    pub const fn delete(key: Key) -> Self {
        Self {
            key,
            value: Value::empty(),
        }
    }

    /// Returns true if this pair marks a delete.
    #[inline]
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.value.is_delete()
    }
}
