//! Region image checksums.
//!
//! Uses CRC32 over the whole region, skipping the checksum field itself so
//! the stored value does not feed back into the computation. The 32-bit
//! digest is widened into the header's u64 checksum slot.

use super::header::CHECKSUM_FIELD_OFFSET;

/// Computes the image checksum over `region_bytes`, excluding the 8-byte
/// checksum field in the header.
pub(crate) fn compute_region_checksum(region_bytes: &[u8]) -> u64 {
    debug_assert!(region_bytes.len() >= CHECKSUM_FIELD_OFFSET + 8);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&region_bytes[..CHECKSUM_FIELD_OFFSET]);
    hasher.update(&region_bytes[CHECKSUM_FIELD_OFFSET + 8..]);
    u64::from(hasher.finalize())
}

/// Verifies `stored` against the checksum of `region_bytes`.
pub(crate) fn verify_region_checksum(region_bytes: &[u8], stored: u64) -> bool {
    compute_region_checksum(region_bytes) == stored
}
