//! Offset-based typed references.
//!
//! A [`PPtr`] stores a byte offset from the region base instead of a host
//! address, which is what lets a saved region be re-loaded at a different
//! address with every stored reference still resolving correctly. The type
//! parameter is phantom: it costs nothing at runtime and is not validated,
//! so resolving with the wrong type is as undefined as a C cast.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use permem_common::constants::REGION_HEADER_SIZE;
use permem_common::types::RawOffset;

use crate::manager::RegionManager;

/// A relocation-safe typed reference into a managed region.
///
/// `PPtr<T>` is a single offset plus a phantom type; it is the size of one
/// host pointer and is freely `Copy`, `Send`, and `Sync` regardless of `T`.
/// It is a *weak* reference: it stays bit-identical after the target is
/// freed, and nothing detects the dangle. The null pointer is offset 0.
///
/// # Example
///
/// ```rust
/// use permem_core::{PPtr, RegionManager};
/// use permem_common::memory::RegionBuffer;
///
/// let mut buffer = RegionBuffer::new(64 * 1024);
/// // SAFETY: the buffer outlives the manager and is not used elsewhere.
/// let mgr = unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();
///
/// let p: PPtr<u64> = mgr.allocate_typed(1).unwrap();
/// if let Some(target) = p.resolve_checked(&mgr) {
///     unsafe { *target.as_ptr() = 7 };
/// }
///
/// mgr.deallocate_typed(p).unwrap();
/// mgr.destroy();
/// ```
#[repr(transparent)]
pub struct PPtr<T> {
    offset: RawOffset,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PPtr<T> {
    /// The null pointer.
    pub const NULL: Self = Self {
        offset: RawOffset::NULL,
        _marker: PhantomData,
    };

    /// Creates the null pointer.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self::NULL
    }

    /// Creates a pointer from a stored offset. No validation happens here;
    /// the offset is trusted to come from an allocation in the same region
    /// layout (typically one recorded before a save/load cycle).
    #[inline]
    #[must_use]
    pub const fn from_offset(offset: RawOffset) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Returns the stored offset.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> RawOffset {
        self.offset
    }

    /// Returns true if this is the null pointer.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.offset.is_null()
    }

    /// Resolves to a host pointer against the manager's region base.
    ///
    /// This is the unchecked fast path: pure arithmetic, no bounds check,
    /// no lock. Returns a null pointer when `self` is null. The caller must
    /// ensure the target allocation is live, is really a `T`, and is not
    /// concurrently freed or moved by a reallocation; none of that is
    /// detected here.
    #[inline]
    #[must_use]
    pub fn resolve(&self, mgr: &RegionManager) -> *mut T {
        if self.is_null() {
            return ptr::null_mut();
        }
        // SAFETY: non-null offsets produced by the allocator are in bounds;
        // anything else is the caller's contract violation.
        unsafe {
            mgr.base_ptr()
                .add(self.offset.as_u64() as usize)
                .cast::<T>()
        }
    }

    /// Resolves with bounds and alignment checks.
    ///
    /// Returns `None` when the pointer is null, the target range does not
    /// lie inside the region's dynamic area, or the offset is misaligned
    /// for `T`. Liveness is still not checked. Tests and diagnostics should
    /// prefer this variant.
    #[must_use]
    pub fn resolve_checked(&self, mgr: &RegionManager) -> Option<NonNull<T>> {
        self.checked_target(mgr, self.offset.as_u64())
    }

    /// Resolves element `index` of an array allocation.
    ///
    /// Unchecked, like [`resolve`](Self::resolve). Returns null when `self`
    /// is null.
    #[inline]
    #[must_use]
    pub fn resolve_at(&self, mgr: &RegionManager, index: usize) -> *mut T {
        let base = self.resolve(mgr);
        if base.is_null() {
            return base;
        }
        // SAFETY: in-bounds for any index inside the original allocation,
        // which is the caller's contract.
        unsafe { base.add(index) }
    }

    /// Resolves element `index` with bounds and alignment checks.
    #[must_use]
    pub fn resolve_at_checked(&self, mgr: &RegionManager, index: usize) -> Option<NonNull<T>> {
        let elem = (index as u64).checked_mul(mem::size_of::<T>() as u64)?;
        let offset = self.offset.as_u64().checked_add(elem)?;
        self.checked_target(mgr, offset)
    }

    fn checked_target(&self, mgr: &RegionManager, offset: u64) -> Option<NonNull<T>> {
        if self.is_null() {
            return None;
        }
        let end = offset.checked_add(mem::size_of::<T>() as u64)?;
        if offset < REGION_HEADER_SIZE || end > mgr.region_size() {
            return None;
        }
        let align = mem::align_of::<T>() as u64;
        if offset % align != 0 {
            return None;
        }
        // SAFETY: the range [offset, end) was just checked against the
        // region bounds.
        NonNull::new(unsafe { mgr.base_ptr().add(offset as usize).cast::<T>() })
    }
}

// Manual impls: the derives would demand the same bound on `T`, which a
// phantom-typed offset does not need.

impl<T> Clone for PPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PPtr<T> {}

impl<T> Default for PPtr<T> {
    #[inline]
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> PartialEq for PPtr<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for PPtr<T> {}

impl<T> Hash for PPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
    }
}

impl<T> fmt::Debug for PPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PPtr(NULL)")
        } else {
            write!(f, "PPtr({:#x})", self.offset.as_u64())
        }
    }
}

impl<T> From<RawOffset> for PPtr<T> {
    #[inline]
    fn from(offset: RawOffset) -> Self {
        Self::from_offset(offset)
    }
}

impl<T> Serialize for PPtr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.offset.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for PPtr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawOffset::deserialize(deserializer).map(Self::from_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BIND_GUARD;
    use permem_common::memory::RegionBuffer;

    #[test]
    fn test_pointer_sized() {
        assert_eq!(mem::size_of::<PPtr<u8>>(), mem::size_of::<*mut u8>());
        assert_eq!(mem::size_of::<PPtr<f64>>(), mem::size_of::<*mut f64>());
        assert_eq!(mem::size_of::<PPtr<[u8; 128]>>(), mem::size_of::<usize>());
    }

    #[test]
    fn test_default_is_null() {
        let p: PPtr<u32> = PPtr::default();
        assert!(p.is_null());
        assert_eq!(p.offset(), RawOffset::NULL);
        assert_eq!(p, PPtr::null());
    }

    #[test]
    fn test_equality_is_offset_equality() {
        let a: PPtr<u32> = PPtr::from_offset(RawOffset::new(128));
        let b: PPtr<u32> = PPtr::from_offset(RawOffset::new(128));
        let c: PPtr<u32> = PPtr::from_offset(RawOffset::new(256));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_debug_format() {
        let p: PPtr<u32> = PPtr::from_offset(RawOffset::new(0x80));
        assert_eq!(format!("{:?}", p), "PPtr(0x80)");
        assert_eq!(format!("{:?}", PPtr::<u32>::NULL), "PPtr(NULL)");
    }

    #[test]
    fn test_resolve_null_is_null() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(64 * 1024);
        let mgr =
            unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();

        let p: PPtr<u32> = PPtr::null();
        assert!(p.resolve(&mgr).is_null());
        assert!(p.resolve_checked(&mgr).is_none());
        assert!(p.resolve_at(&mgr, 3).is_null());

        mgr.destroy();
    }

    #[test]
    fn test_resolve_points_into_region() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(64 * 1024);
        let base = buffer.as_mut_ptr();
        let mgr = unsafe { RegionManager::create(base, buffer.len()) }.unwrap();

        let p: PPtr<u32> = mgr.allocate_typed(1).unwrap();
        let host = p.resolve(&mgr);
        assert!(!host.is_null());

        let addr = host as usize;
        assert!(addr >= base as usize);
        assert!(addr < base as usize + buffer.len());
        assert_eq!(addr - base as usize, p.offset().as_u64() as usize);

        mgr.deallocate_typed(p).unwrap();
        mgr.destroy();
    }

    #[test]
    fn test_write_read_through_resolve() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(64 * 1024);
        let mgr =
            unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();

        let p: PPtr<i32> = mgr.allocate_typed(1).unwrap();
        let target = p.resolve_checked(&mgr).unwrap();
        unsafe {
            *target.as_ptr() = 42;
            assert_eq!(*p.resolve(&mgr), 42);
            *p.resolve(&mgr) = 100;
            assert_eq!(*target.as_ptr(), 100);
        }

        mgr.deallocate_typed(p).unwrap();
        mgr.destroy();
    }

    #[test]
    fn test_resolve_at_array_access() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(256 * 1024);
        let mgr =
            unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();

        const COUNT: usize = 5;
        let p: PPtr<f64> = mgr.allocate_typed(COUNT).unwrap();
        for i in 0..COUNT {
            let elem = p.resolve_at_checked(&mgr, i).unwrap();
            unsafe { *elem.as_ptr() = i as f64 * 1.5 };
        }

        let base = p.resolve(&mgr);
        for i in 0..COUNT {
            unsafe { assert_eq!(*base.add(i), i as f64 * 1.5) };
        }

        mgr.deallocate_typed(p).unwrap();
        mgr.destroy();
    }

    #[test]
    fn test_resolve_checked_rejects_out_of_range() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(64 * 1024);
        let mgr =
            unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();

        // Inside the header
        let p: PPtr<u64> = PPtr::from_offset(RawOffset::new(8));
        assert!(p.resolve_checked(&mgr).is_none());

        // Past the region end
        let p: PPtr<u64> = PPtr::from_offset(RawOffset::new(buffer.len() as u64));
        assert!(p.resolve_checked(&mgr).is_none());

        // Straddling the region end
        let p: PPtr<u64> = PPtr::from_offset(RawOffset::new(buffer.len() as u64 - 4));
        assert!(p.resolve_checked(&mgr).is_none());

        // Misaligned for the type
        let p: PPtr<u64> = PPtr::from_offset(RawOffset::new(1001));
        assert!(p.resolve_checked(&mgr).is_none());

        mgr.destroy();
    }

    #[test]
    fn test_multiple_types_in_one_region() {
        let _guard = BIND_GUARD.lock();
        let mut buffer = RegionBuffer::new(256 * 1024);
        let mgr =
            unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();

        let pi: PPtr<i32> = mgr.allocate_typed(1).unwrap();
        let pd: PPtr<f64> = mgr.allocate_typed(1).unwrap();
        let pc: PPtr<u8> = mgr.allocate_typed(16).unwrap();

        unsafe {
            *pi.resolve(&mgr) = 7;
            *pd.resolve(&mgr) = 3.25;
            let text = b"hello\0";
            ptr::copy_nonoverlapping(text.as_ptr(), pc.resolve(&mgr), text.len());

            assert_eq!(*pi.resolve(&mgr), 7);
            assert_eq!(*pd.resolve(&mgr), 3.25);
            assert_eq!(
                std::slice::from_raw_parts(pc.resolve(&mgr), 6),
                b"hello\0"
            );
        }
        assert!(mgr.validate());

        mgr.deallocate_typed(pi).unwrap();
        mgr.deallocate_typed(pd).unwrap();
        mgr.deallocate_typed(pc).unwrap();
        assert!(mgr.validate());
        mgr.destroy();
    }
}
