//! Core types for permem.
//!
//! Every reference stored inside a region is a byte offset from the region
//! base, never a host address. [`RawOffset`] is the type-safe wrapper for
//! such offsets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset from the region base to a user payload.
///
/// Offset 0 is the null sentinel: the region header occupies offset 0, so no
/// payload can ever live there. Offsets are stable across save/load cycles
/// because they are relative to the region base, not the host address.
///
/// # Example
///
/// ```rust
/// use permem_common::types::RawOffset;
///
/// let off = RawOffset::new(128);
/// assert_eq!(off.as_u64(), 128);
/// assert!(!off.is_null());
/// assert!(RawOffset::NULL.is_null());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RawOffset(u64);

impl RawOffset {
    /// The null offset, used as a failure and "no reference" sentinel.
    pub const NULL: Self = Self(0);

    /// Creates a new `RawOffset` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the null offset.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for RawOffset {
    #[inline]
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for RawOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RawOffset(NULL)")
        } else {
            write!(f, "RawOffset({:#x})", self.0)
        }
    }
}

impl fmt::Display for RawOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RawOffset {
    #[inline]
    fn from(offset: u64) -> Self {
        Self::new(offset)
    }
}

impl From<RawOffset> for u64 {
    #[inline]
    fn from(offset: RawOffset) -> Self {
        offset.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_offset() {
        assert!(RawOffset::NULL.is_null());
        assert_eq!(RawOffset::NULL.as_u64(), 0);
        assert_eq!(RawOffset::default(), RawOffset::NULL);
        assert_eq!(RawOffset::new(0), RawOffset::NULL);
    }

    #[test]
    fn test_non_null_offset() {
        let off = RawOffset::new(4096);
        assert!(!off.is_null());
        assert_eq!(off.as_u64(), 4096);
    }

    #[test]
    fn test_ordering() {
        assert!(RawOffset::new(64) < RawOffset::new(128));
        assert_eq!(RawOffset::new(64), RawOffset::new(64));
    }

    #[test]
    fn test_conversions() {
        let off: RawOffset = 256u64.into();
        assert_eq!(off, RawOffset::new(256));
        let raw: u64 = off.into();
        assert_eq!(raw, 256);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", RawOffset::NULL), "RawOffset(NULL)");
        assert_eq!(format!("{:?}", RawOffset::new(0x80)), "RawOffset(0x80)");
    }
}
