//! Region image I/O.
//!
//! An image is the region's bytes, verbatim: because every internal
//! reference is an offset, the layout is position-independent and no
//! rewriting happens on either side. The only bytes `save` synthesizes are
//! the header's checksum field, which is computed into the file copy so the
//! live region stays untouched.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use permem_common::constants::REGION_HEADER_SIZE;
use permem_common::error::{PermemError, PermemResult};

use crate::region::checksum::{compute_region_checksum, verify_region_checksum};
use crate::region::header::{RegionHeader, CHECKSUM_FIELD_OFFSET};
use crate::region::RawRegion;

/// Durability policy for image writes.
///
/// The default is best-effort: bytes reach the file, nothing forces them to
/// stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Flush file data and metadata to stable storage before returning.
    Always,
    /// Leave flushing to the operating system.
    #[default]
    Never,
}

/// Options for saving and loading region images.
///
/// # Example
///
/// ```rust
/// use permem_core::{ImageOptions, SyncPolicy};
///
/// let options = ImageOptions::new()
///     .with_sync_policy(SyncPolicy::Always)
///     .with_verify_checksum(false);
/// assert_eq!(options.sync_policy, SyncPolicy::Always);
/// ```
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Durability of `save`.
    pub sync_policy: SyncPolicy,

    /// Whether `load_from_file` verifies the image checksum.
    ///
    /// A stored checksum of zero is treated as absent and never fails
    /// verification.
    pub verify_checksum: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::default(),
            verify_checksum: true,
        }
    }
}

impl ImageOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durability policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets whether to verify checksums on load.
    #[must_use]
    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

/// Writes the region to `path`: a checksummed copy of the header followed by
/// the rest of the region bytes, exactly `region_size` bytes total.
pub(crate) fn write_image(
    region: RawRegion,
    path: &Path,
    options: &ImageOptions,
) -> PermemResult<()> {
    // SAFETY: save is documented as requiring quiesced mutators.
    let bytes = unsafe { region.bytes() };

    let mut header_copy = [0u8; REGION_HEADER_SIZE as usize];
    header_copy.copy_from_slice(&bytes[..REGION_HEADER_SIZE as usize]);
    let sum = compute_region_checksum(bytes);
    header_copy[CHECKSUM_FIELD_OFFSET..CHECKSUM_FIELD_OFFSET + 8]
        .copy_from_slice(&sum.to_le_bytes());

    let mut file = File::create(path)?;
    file.write_all(&header_copy)?;
    file.write_all(&bytes[REGION_HEADER_SIZE as usize..])?;
    if options.sync_policy == SyncPolicy::Always {
        file.sync_all()?;
    }

    debug!(path = %path.display(), size = bytes.len(), "saved region image");
    Ok(())
}

/// Reads an image from `path` into the region buffer.
///
/// The file length must equal the region length exactly; after the bytes
/// land, the checksum is verified when the options ask for it. Magic and
/// version checks are the loader's job, after this returns.
pub(crate) fn read_image(path: &Path, region: RawRegion, options: &ImageOptions) -> PermemResult<()> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len != region.len() as u64 {
        return Err(PermemError::SizeMismatch {
            expected: region.len() as u64,
            found: file_len,
        });
    }

    // SAFETY: the caller owns the destination buffer exclusively until the
    // manager is handed out.
    let bytes = unsafe { region.bytes_mut() };
    file.read_exact(bytes)?;

    if options.verify_checksum {
        let stored = RegionHeader::new(region).checksum();
        if stored != 0 && !verify_region_checksum(bytes, stored) {
            return Err(PermemError::ChecksumMismatch {
                stored,
                computed: compute_region_checksum(bytes),
            });
        }
    }

    debug!(path = %path.display(), size = bytes.len(), "loaded region image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ImageOptions::default();
        assert_eq!(options.sync_policy, SyncPolicy::Never);
        assert!(options.verify_checksum);
    }

    #[test]
    fn test_options_builder() {
        let options = ImageOptions::new()
            .with_sync_policy(SyncPolicy::Always)
            .with_verify_checksum(false);
        assert_eq!(options.sync_policy, SyncPolicy::Always);
        assert!(!options.verify_checksum);
    }
}
