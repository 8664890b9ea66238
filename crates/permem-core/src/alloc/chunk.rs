//! Chunk header format.
//!
//! Every allocation unit inside a block, free or used, starts with a
//! 32-byte chunk header at an alignment-multiple offset:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       8   size (including this header)
//!   8       1   state (1 = FREE, 2 = USED)
//!   9       7   reserved
//!  16       8   next_free (offset of next free chunk, 0 terminates)
//!  24       8   prev_free (offset of previous free chunk, 0 terminates)
//! ```
//!
//! The user payload begins right after the header. The free-list links are
//! only meaningful while the chunk is FREE.

use permem_common::constants::CHUNK_HEADER_SIZE;

use crate::region::RawRegion;

const OFF_SIZE: u64 = 0;
const OFF_STATE: u64 = 8;
const OFF_NEXT_FREE: u64 = 16;
const OFF_PREV_FREE: u64 = 24;

/// Chunk allocation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ChunkState {
    /// The chunk is on its block's free list.
    Free = 1,
    /// The chunk holds a live user payload.
    Used = 2,
}

impl ChunkState {
    /// Decodes a state byte; `None` for anything unrecognized.
    #[inline]
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Free),
            2 => Some(Self::Used),
            _ => None,
        }
    }
}

/// View of one chunk header inside a region.
#[derive(Clone, Copy)]
pub(crate) struct Chunk {
    region: RawRegion,
    offset: u64,
}

impl Chunk {
    /// Creates a view of the chunk whose header starts at `offset`.
    #[inline]
    pub(crate) fn at(region: RawRegion, offset: u64) -> Self {
        Self { region, offset }
    }

    /// Creates a view of the chunk owning the payload at `payload_offset`.
    #[inline]
    pub(crate) fn from_payload(region: RawRegion, payload_offset: u64) -> Self {
        Self::at(region, payload_offset - CHUNK_HEADER_SIZE)
    }

    /// Offset of this chunk's header from the region base.
    #[inline]
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset of the user payload.
    #[inline]
    pub(crate) fn payload_offset(&self) -> u64 {
        self.offset + CHUNK_HEADER_SIZE
    }

    /// Bytes available to the user: chunk size minus the header.
    #[inline]
    pub(crate) fn payload_capacity(&self) -> u64 {
        self.size() - CHUNK_HEADER_SIZE
    }

    /// Offset one past the last byte of this chunk.
    #[inline]
    pub(crate) fn end_offset(&self) -> u64 {
        self.offset + self.size()
    }

    #[inline]
    pub(crate) fn size(&self) -> u64 {
        self.region.read_u64(self.offset + OFF_SIZE)
    }

    #[inline]
    pub(crate) fn set_size(&self, size: u64) {
        self.region.write_u64(self.offset + OFF_SIZE, size);
    }

    #[inline]
    pub(crate) fn state(&self) -> Option<ChunkState> {
        ChunkState::from_u8(self.region.read_u8(self.offset + OFF_STATE))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ChunkState) {
        self.region.write_u8(self.offset + OFF_STATE, state as u8);
    }

    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.state() == Some(ChunkState::Free)
    }

    #[inline]
    pub(crate) fn next_free(&self) -> u64 {
        self.region.read_u64(self.offset + OFF_NEXT_FREE)
    }

    #[inline]
    pub(crate) fn set_next_free(&self, offset: u64) {
        self.region.write_u64(self.offset + OFF_NEXT_FREE, offset);
    }

    #[inline]
    pub(crate) fn prev_free(&self) -> u64 {
        self.region.read_u64(self.offset + OFF_PREV_FREE)
    }

    #[inline]
    pub(crate) fn set_prev_free(&self, offset: u64) {
        self.region.write_u64(self.offset + OFF_PREV_FREE, offset);
    }

    /// Writes a complete free-chunk header in one go.
    pub(crate) fn init_free(&self, size: u64, next_free: u64, prev_free: u64) {
        self.set_size(size);
        self.set_state(ChunkState::Free);
        self.set_next_free(next_free);
        self.set_prev_free(prev_free);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permem_common::memory::RegionBuffer;
    use std::ptr::NonNull;

    fn region_over(buffer: &mut RegionBuffer) -> RawRegion {
        // SAFETY: the buffer outlives the view in these tests
        unsafe { RawRegion::new(NonNull::new(buffer.as_mut_ptr()).unwrap(), buffer.len()) }
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(ChunkState::from_u8(1), Some(ChunkState::Free));
        assert_eq!(ChunkState::from_u8(2), Some(ChunkState::Used));
        assert_eq!(ChunkState::from_u8(0), None);
        assert_eq!(ChunkState::from_u8(0xFF), None);
    }

    #[test]
    fn test_header_round_trip() {
        let mut buffer = RegionBuffer::new(256);
        let region = region_over(&mut buffer);

        let chunk = Chunk::at(region, 64);
        chunk.init_free(96, 160, 0);

        assert_eq!(chunk.size(), 96);
        assert_eq!(chunk.state(), Some(ChunkState::Free));
        assert!(chunk.is_free());
        assert_eq!(chunk.next_free(), 160);
        assert_eq!(chunk.prev_free(), 0);
        assert_eq!(chunk.end_offset(), 160);
        assert_eq!(chunk.payload_offset(), 64 + CHUNK_HEADER_SIZE);
        assert_eq!(chunk.payload_capacity(), 96 - CHUNK_HEADER_SIZE);
    }

    #[test]
    fn test_from_payload() {
        let mut buffer = RegionBuffer::new(256);
        let region = region_over(&mut buffer);

        let chunk = Chunk::at(region, 96);
        chunk.init_free(64, 0, 0);

        let recovered = Chunk::from_payload(region, chunk.payload_offset());
        assert_eq!(recovered.offset(), 96);
        assert_eq!(recovered.size(), 64);
    }

    #[test]
    fn test_used_state() {
        let mut buffer = RegionBuffer::new(256);
        let region = region_over(&mut buffer);

        let chunk = Chunk::at(region, 0);
        chunk.init_free(128, 0, 0);
        chunk.set_state(ChunkState::Used);

        assert!(!chunk.is_free());
        assert_eq!(chunk.state(), Some(ChunkState::Used));
    }
}
