//! Error types for permem.
//!
//! This module defines the unified error type for all region operations.

use std::io;
use thiserror::Error;

/// Result type alias for permem operations.
pub type PermemResult<T> = std::result::Result<T, PermemError>;

/// Errors that can occur while managing a region.
#[derive(Debug, Error)]
pub enum PermemError {
    /// The caller-supplied region is unusable (null, misaligned, too small).
    #[error("invalid region: {reason}")]
    InvalidRegion {
        /// Why the region was rejected.
        reason: String,
    },

    /// The region bytes do not start with the permem magic.
    #[error("invalid region magic: expected {expected:#018x}, found {found:#018x}")]
    InvalidMagic {
        /// The magic value this build recognizes.
        expected: u64,
        /// The magic value found in the region.
        found: u64,
    },

    /// The region format version is not recognized by this build.
    #[error("unsupported region version: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// The version this build recognizes.
        expected: u16,
        /// The version found in the region.
        found: u16,
    },

    /// The image length does not match the supplied buffer size.
    #[error("region size mismatch: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// The size the caller supplied.
        expected: u64,
        /// The size recorded in the image or on disk.
        found: u64,
    },

    /// The image checksum does not match its contents.
    #[error("image checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch {
        /// The checksum recorded in the image header.
        stored: u64,
        /// The checksum computed over the image bytes.
        computed: u64,
    },

    /// No free chunk can satisfy the request.
    #[error("out of memory: cannot satisfy allocation of {requested} bytes")]
    OutOfMemory {
        /// The requested payload size in bytes.
        requested: u64,
    },

    /// A manager is already bound to a region in this process.
    #[error("a region manager is already bound in this process")]
    AlreadyBound,

    /// The offset does not refer to a live allocation.
    #[error("invalid offset: {offset:#x} does not refer to a live allocation")]
    InvalidOffset {
        /// The offending offset.
        offset: u64,
    },

    /// The payload type's alignment exceeds the allocation alignment.
    #[error("unsupported payload alignment: {align} exceeds the allocation alignment")]
    UnsupportedAlignment {
        /// The alignment the payload type requires.
        align: u64,
    },

    /// Structural damage detected inside the region.
    #[error("region corrupted: {reason}")]
    Corrupted {
        /// What the walk found.
        reason: String,
    },

    /// I/O error while reading or writing an image file.
    #[error("image I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },
}

impl PermemError {
    /// Creates an invalid-region error.
    pub fn invalid_region(reason: impl Into<String>) -> Self {
        Self::InvalidRegion {
            reason: reason.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::Corrupted {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates a damaged or foreign image.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. } | Self::ChecksumMismatch { .. } | Self::Corrupted { .. }
        )
    }

    /// Returns true if the operation may succeed if retried with different
    /// arguments (smaller request, after frees, after a destroy).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::AlreadyBound)
    }
}
