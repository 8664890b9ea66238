//! # permem-core
//!
//! Persistent region manager for permem.
//!
//! This crate administers a caller-provided contiguous byte region as a
//! self-describing heap whose entire state lives inside the region:
//!
//! - [`PPtr`]: offset-based typed references that survive relocation
//! - [`RegionManager`]: the allocation API and image lifecycle
//! - Image I/O: [`RegionManager::save`] and [`RegionManager::load_from_file`]
//! - [`ValidationReport`]: structural invariant checking
//!
//! Because every internal reference is a byte offset from the region base,
//! a saved image can be re-loaded at a different host address and every
//! stored reference keeps resolving to the same payload.
//!
//! ## Example
//!
//! ```rust
//! use permem_core::RegionManager;
//! use permem_common::memory::RegionBuffer;
//!
//! let mut buffer = RegionBuffer::new(64 * 1024);
//! // SAFETY: the buffer outlives the manager and is not used elsewhere.
//! let mgr = unsafe { RegionManager::create(buffer.as_mut_ptr(), buffer.len()) }.unwrap();
//!
//! let p = mgr.allocate_typed::<u32>(1).unwrap();
//! unsafe { *p.resolve(&mgr) = 42 };
//! assert_eq!(unsafe { *p.resolve(&mgr) }, 42);
//!
//! mgr.deallocate_typed(p).unwrap();
//! assert!(mgr.validate());
//! mgr.destroy();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod alloc;
mod region;

pub mod image;
pub mod manager;
pub mod pptr;
pub mod validate;

pub use image::{ImageOptions, SyncPolicy};
pub use manager::RegionManager;
pub use pptr::PPtr;
pub use validate::ValidationReport;

pub use permem_common::error::{PermemError, PermemResult};
pub use permem_common::memory::RegionBuffer;
pub use permem_common::types::RawOffset;
