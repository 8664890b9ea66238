//! # permem-common
//!
//! Common types, errors, and layout constants for permem.
//!
//! This crate provides the foundational pieces shared by all permem
//! components:
//!
//! - **Constants**: the region format layout (magic, alignment, header sizes)
//! - **Errors**: unified error handling with [`PermemError`]
//! - **Types**: the [`RawOffset`] region offset newtype
//! - **Memory**: [`RegionBuffer`], backing memory shaped to the region
//!   contract
//!
//! ## Example
//!
//! ```rust
//! use permem_common::constants::{ALLOC_ALIGN, MIN_REGION_SIZE};
//! use permem_common::memory::RegionBuffer;
//! use permem_common::types::RawOffset;
//!
//! // Any capacity is rounded up to a valid create/load target.
//! let buffer = RegionBuffer::new(100);
//! assert!(buffer.len() as u64 >= MIN_REGION_SIZE);
//! assert_eq!(buffer.len() as u64 % ALLOC_ALIGN, 0);
//! assert!(RawOffset::NULL.is_null());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod memory;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{PermemError, PermemResult};
pub use memory::RegionBuffer;
pub use types::RawOffset;
