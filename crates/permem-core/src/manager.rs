//! The region manager.
//!
//! [`RegionManager`] binds the process to one caller-provided region and
//! fronts every operation on it: allocation, image save/load, validation.
//! The manager itself holds no heap state: everything lives in the region,
//! which is why a saved image needs nothing but a rebind to come back.
//!
//! # Concurrency
//!
//! Mutating operations serialize on one internal mutex held for the whole
//! call; the allocator internals never lock, so re-entrant flows (a
//! reallocation that allocates and frees) acquire it exactly once.
//! `resolve` is lock-free arithmetic. `save`, `validate`, and the counter
//! accessors take no lock either and must only run while mutators are
//! quiesced.

use std::mem;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use permem_common::constants::{
    ALLOC_ALIGN, MIN_REGION_SIZE, REGION_HEADER_SIZE, REGION_MAGIC, REGION_VERSION,
};
use permem_common::error::{PermemError, PermemResult};
use permem_common::types::RawOffset;

use crate::alloc;
use crate::image::{self, ImageOptions};
use crate::pptr::PPtr;
use crate::region::header::RegionHeader;
use crate::region::RawRegion;
use crate::validate::{self, ValidationReport};

/// One binding per process: `PPtr` offsets are only meaningful against a
/// single active region, so a second live manager is refused.
static REGION_BOUND: AtomicBool = AtomicBool::new(false);

/// Manager for one caller-provided region.
///
/// Created over raw memory with [`create`](Self::create), or rebound to an
/// existing image with [`load`](Self::load) /
/// [`load_from_file`](Self::load_from_file). The region memory stays owned
/// by the caller throughout; dropping or [`destroy`](Self::destroy)ing the
/// manager releases only the binding.
pub struct RegionManager {
    region: RawRegion,
    /// Serializes every mutating operation. Guards no data directly; the
    /// data it protects is the region metadata behind `region`.
    mutate: Mutex<()>,
}

// SAFETY: all metadata mutation goes through `mutate`; concurrent payload
// access through resolved pointers is the resolver caller's contract.
unsafe impl Send for RegionManager {}
unsafe impl Sync for RegionManager {}

impl RegionManager {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initializes a fresh region over `size` bytes at `base` and binds to
    /// it: header, one block spanning the dynamic area, one free chunk
    /// spanning the block.
    ///
    /// Fails with [`PermemError::InvalidRegion`] when `base` is null or
    /// misaligned, or `size` is below [`MIN_REGION_SIZE`] or not a multiple
    /// of [`ALLOC_ALIGN`]; with [`PermemError::AlreadyBound`] when another
    /// manager is live in this process.
    ///
    /// # Safety
    ///
    /// `base` must point to `size` writable bytes that outlive the manager
    /// and are not accessed by anything else except through this manager
    /// and pointers it resolves.
    pub unsafe fn create(base: *mut u8, size: usize) -> PermemResult<Self> {
        let region = check_region_args(base, size)?;
        bind()?;
        alloc::format_region(region);
        debug!(size, "created region");
        Ok(Self {
            region,
            mutate: Mutex::new(()),
        })
    }

    /// Binds to a region whose bytes already hold a valid image (for
    /// example, freshly read from disk). No offset inside the region is
    /// touched; the manager only records the new host base.
    ///
    /// Fails with [`PermemError::InvalidMagic`],
    /// [`PermemError::UnsupportedVersion`], or [`PermemError::SizeMismatch`]
    /// when the bytes are not an image this build can adopt.
    ///
    /// # Safety
    ///
    /// Same contract as [`create`](Self::create).
    pub unsafe fn load(base: *mut u8, size: usize) -> PermemResult<Self> {
        let region = check_region_args(base, size)?;
        let header = RegionHeader::new(region);
        if !header.is_valid_magic() {
            return Err(PermemError::InvalidMagic {
                expected: REGION_MAGIC,
                found: header.magic(),
            });
        }
        if header.version() != REGION_VERSION {
            return Err(PermemError::UnsupportedVersion {
                expected: REGION_VERSION,
                found: header.version(),
            });
        }
        if u64::from(header.header_size()) != REGION_HEADER_SIZE {
            return Err(PermemError::corrupted(format!(
                "header size {} does not match the format",
                header.header_size()
            )));
        }
        if header.region_size() != size as u64 {
            return Err(PermemError::SizeMismatch {
                expected: size as u64,
                found: header.region_size(),
            });
        }
        bind()?;
        debug!(size, "loaded region");
        Ok(Self {
            region,
            mutate: Mutex::new(()),
        })
    }

    /// Reads the image at `path` into the buffer at `base` and binds to it.
    ///
    /// # Safety
    ///
    /// Same contract as [`create`](Self::create).
    pub unsafe fn load_from_file(
        path: impl AsRef<Path>,
        base: *mut u8,
        size: usize,
    ) -> PermemResult<Self> {
        Self::load_from_file_with(path, base, size, &ImageOptions::default())
    }

    /// [`load_from_file`](Self::load_from_file) with explicit options.
    ///
    /// # Safety
    ///
    /// Same contract as [`create`](Self::create).
    pub unsafe fn load_from_file_with(
        path: impl AsRef<Path>,
        base: *mut u8,
        size: usize,
        options: &ImageOptions,
    ) -> PermemResult<Self> {
        let region = check_region_args(base, size)?;
        image::read_image(path.as_ref(), region, options)?;
        Self::load(base, size)
    }

    /// Releases the binding. The region memory itself stays with the
    /// caller, holding whatever state it held; a subsequent
    /// [`load`](Self::load) over the same bytes picks up where this left
    /// off.
    pub fn destroy(self) {
        debug!("destroying region binding");
        // Drop does the unbinding.
    }

    /// Writes the region to `path` as an image: `region_size` bytes,
    /// verbatim, with a freshly computed header checksum in the file copy.
    ///
    /// Read-only and unlocked; quiesce mutators first. Durability follows
    /// the default [`ImageOptions`] (best-effort).
    pub fn save(&self, path: impl AsRef<Path>) -> PermemResult<()> {
        self.save_with(path, &ImageOptions::default())
    }

    /// [`save`](Self::save) with explicit options.
    pub fn save_with(&self, path: impl AsRef<Path>, options: &ImageOptions) -> PermemResult<()> {
        image::write_image(self.region, path.as_ref(), options)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates `size` payload bytes; returns the payload offset.
    ///
    /// The offset is a multiple of the allocation alignment and strictly
    /// past the region header. Fails with [`PermemError::OutOfMemory`] when
    /// no free chunk fits.
    pub fn allocate(&self, size: usize) -> PermemResult<RawOffset> {
        let _guard = self.mutate.lock();
        alloc::allocate(self.region, size as u64)
    }

    /// Frees the allocation at `offset`. The null offset is a no-op.
    pub fn deallocate(&self, offset: RawOffset) -> PermemResult<()> {
        let _guard = self.mutate.lock();
        alloc::deallocate(self.region, offset)
    }

    /// Resizes the allocation at `offset` to `new_size` bytes.
    ///
    /// A null `offset` allocates; a zero `new_size` frees and returns the
    /// null offset. The allocation stays in place when the chunk can be
    /// shrunk or grown where it is; otherwise the payload moves and the old
    /// bytes are copied up to the smaller of the two sizes. On failure the
    /// original allocation is untouched.
    pub fn reallocate(&self, offset: RawOffset, new_size: usize) -> PermemResult<RawOffset> {
        let _guard = self.mutate.lock();
        alloc::reallocate(self.region, offset, new_size as u64)
    }

    // =========================================================================
    // Typed facade
    // =========================================================================

    /// Allocates space for `count` values of `T`, returning a typed offset
    /// pointer. The memory is not initialized.
    pub fn allocate_typed<T>(&self, count: usize) -> PermemResult<PPtr<T>> {
        check_payload_align::<T>()?;
        let bytes = mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(PermemError::OutOfMemory { requested: u64::MAX })?;
        Ok(PPtr::from_offset(self.allocate(bytes)?))
    }

    /// Frees a typed allocation. A null pointer is a no-op.
    pub fn deallocate_typed<T>(&self, ptr: PPtr<T>) -> PermemResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        self.deallocate(ptr.offset())
    }

    /// Resizes a typed allocation to `count` values of `T`.
    pub fn reallocate_typed<T>(&self, ptr: PPtr<T>, count: usize) -> PermemResult<PPtr<T>> {
        check_payload_align::<T>()?;
        let bytes = mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(PermemError::OutOfMemory { requested: u64::MAX })?;
        Ok(PPtr::from_offset(self.reallocate(ptr.offset(), bytes)?))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Total region size in bytes.
    #[must_use]
    pub fn region_size(&self) -> u64 {
        RegionHeader::new(self.region).region_size()
    }

    /// Sum of free chunk payload capacities, in bytes.
    #[must_use]
    pub fn free_size(&self) -> u64 {
        RegionHeader::new(self.region).free_size()
    }

    /// Number of live allocations.
    #[must_use]
    pub fn allocated_blocks(&self) -> u64 {
        RegionHeader::new(self.region).allocated_count()
    }

    /// Checks every structural invariant of the region.
    ///
    /// Read-only and unlocked; quiesce mutators first.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.validate_report().is_valid()
    }

    /// Like [`validate`](Self::validate), but returns the full tally of
    /// what the walk found.
    #[must_use]
    pub fn validate_report(&self) -> ValidationReport {
        validate::validate_region(self.region)
    }

    /// Host address of the region base.
    #[inline]
    #[must_use]
    pub fn base_ptr(&self) -> *mut u8 {
        self.region.base_ptr()
    }
}

impl Drop for RegionManager {
    fn drop(&mut self) {
        REGION_BOUND.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RegionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionManager")
            .field("base", &self.region.base_ptr())
            .field("region_size", &self.region_size())
            .field("free_size", &self.free_size())
            .field("allocated_blocks", &self.allocated_blocks())
            .finish()
    }
}

/// Claims the process-wide binding slot.
fn bind() -> PermemResult<()> {
    REGION_BOUND
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| PermemError::AlreadyBound)?;
    Ok(())
}

/// Validates a caller-supplied base/size pair and builds the raw view.
fn check_region_args(base: *mut u8, size: usize) -> PermemResult<RawRegion> {
    let base = NonNull::new(base)
        .ok_or_else(|| PermemError::invalid_region("base pointer is null"))?;
    if (base.as_ptr() as usize) as u64 % ALLOC_ALIGN != 0 {
        return Err(PermemError::invalid_region(format!(
            "base {:p} is not {}-byte aligned",
            base.as_ptr(),
            ALLOC_ALIGN
        )));
    }
    if (size as u64) < MIN_REGION_SIZE {
        return Err(PermemError::invalid_region(format!(
            "size {} is below the minimum of {}",
            size, MIN_REGION_SIZE
        )));
    }
    if size as u64 % ALLOC_ALIGN != 0 {
        return Err(PermemError::invalid_region(format!(
            "size {} is not a multiple of {}",
            size, ALLOC_ALIGN
        )));
    }
    // SAFETY: per the caller's contract on create/load.
    Ok(unsafe { RawRegion::new(base, size) })
}

/// The allocator hands out alignment-multiple offsets; types needing more
/// cannot be placed.
fn check_payload_align<T>() -> PermemResult<()> {
    if mem::align_of::<T>() as u64 > ALLOC_ALIGN {
        return Err(PermemError::UnsupportedAlignment {
            align: mem::align_of::<T>() as u64,
        });
    }
    Ok(())
}
