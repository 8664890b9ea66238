//! Block descriptors and free-list maintenance.
//!
//! A block is a contiguous sub-arena of the region with its own
//! doubly-linked free list. Descriptors are 32 bytes each and sit in a
//! contiguous array starting at the header's `first_block_offset`:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       8   base_offset
//!   8       8   size
//!  16       8   free_head (offset of first free chunk, 0 = empty)
//!  24       8   reserved
//! ```
//!
//! Free-list invariants: links are kept in ascending offset order, `prev_free`
//! mirrors `next_free`, and no two physically adjacent chunks are both free
//! (adjacent frees are merged on insertion paths).

use permem_common::constants::BLOCK_DESC_SIZE;

use crate::region::header::RegionHeader;
use crate::region::RawRegion;

use super::chunk::Chunk;

const OFF_BASE: u64 = 0;
const OFF_SIZE: u64 = 8;
const OFF_FREE_HEAD: u64 = 16;
const OFF_RESERVED: u64 = 24;

/// View of one block descriptor.
#[derive(Clone, Copy)]
pub(crate) struct Block {
    region: RawRegion,
    desc_offset: u64,
}

impl Block {
    /// Creates a view of the descriptor at `desc_offset`.
    #[inline]
    pub(crate) fn at(region: RawRegion, desc_offset: u64) -> Self {
        Self {
            region,
            desc_offset,
        }
    }

    /// Writes a complete descriptor for a block at `base_offset` of `size`
    /// bytes, with an empty free list.
    pub(crate) fn initialize(&self, base_offset: u64, size: u64) {
        self.region.write_u64(self.desc_offset + OFF_BASE, base_offset);
        self.region.write_u64(self.desc_offset + OFF_SIZE, size);
        self.region.write_u64(self.desc_offset + OFF_FREE_HEAD, 0);
        self.region.write_u64(self.desc_offset + OFF_RESERVED, 0);
    }

    #[inline]
    pub(crate) fn base_offset(&self) -> u64 {
        self.region.read_u64(self.desc_offset + OFF_BASE)
    }

    #[inline]
    pub(crate) fn size(&self) -> u64 {
        self.region.read_u64(self.desc_offset + OFF_SIZE)
    }

    /// Offset one past the last byte of the block.
    #[inline]
    pub(crate) fn end_offset(&self) -> u64 {
        self.base_offset() + self.size()
    }

    #[inline]
    pub(crate) fn free_head(&self) -> u64 {
        self.region.read_u64(self.desc_offset + OFF_FREE_HEAD)
    }

    #[inline]
    pub(crate) fn set_free_head(&self, offset: u64) {
        self.region.write_u64(self.desc_offset + OFF_FREE_HEAD, offset);
    }

    /// Returns true if `offset` falls inside this block.
    #[inline]
    pub(crate) fn contains(&self, offset: u64) -> bool {
        offset >= self.base_offset() && offset < self.end_offset()
    }

    // =========================================================================
    // Free-list operations
    // =========================================================================

    /// First-fit search: the first free chunk with at least `need` bytes.
    pub(crate) fn first_fit(&self, need: u64) -> Option<Chunk> {
        let mut off = self.free_head();
        while off != 0 {
            let chunk = Chunk::at(self.region, off);
            if chunk.size() >= need {
                return Some(chunk);
            }
            off = chunk.next_free();
        }
        None
    }

    /// Links `chunk` into the free list, preserving ascending offset order.
    pub(crate) fn insert_free(&self, chunk: Chunk) {
        let target = chunk.offset();
        let mut prev = 0u64;
        let mut next = self.free_head();
        while next != 0 && next < target {
            prev = next;
            next = Chunk::at(self.region, next).next_free();
        }

        chunk.set_prev_free(prev);
        chunk.set_next_free(next);
        if prev == 0 {
            self.set_free_head(target);
        } else {
            Chunk::at(self.region, prev).set_next_free(target);
        }
        if next != 0 {
            Chunk::at(self.region, next).set_prev_free(target);
        }
    }

    /// Unlinks `chunk` from the free list; its own links are left stale.
    pub(crate) fn unlink_free(&self, chunk: &Chunk) {
        let prev = chunk.prev_free();
        let next = chunk.next_free();
        if prev == 0 {
            self.set_free_head(next);
        } else {
            Chunk::at(self.region, prev).set_next_free(next);
        }
        if next != 0 {
            Chunk::at(self.region, next).set_prev_free(prev);
        }
    }

    /// Iterates the physically contiguous chunks of this block.
    ///
    /// The walk trusts chunk sizes; on a damaged region it may stop early.
    /// The validator performs the guarded version of this walk.
    #[allow(dead_code)]
    pub(crate) fn chunks(&self) -> ChunkWalk {
        ChunkWalk {
            region: self.region,
            next: self.base_offset(),
            end: self.end_offset(),
        }
    }
}

/// Iterator over the physical chunk sequence of a block.
pub(crate) struct ChunkWalk {
    region: RawRegion,
    next: u64,
    end: u64,
}

impl Iterator for ChunkWalk {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.end {
            return None;
        }
        let chunk = Chunk::at(self.region, self.next);
        let size = chunk.size();
        if size == 0 {
            // Damaged header; stop rather than loop forever.
            self.next = self.end;
            return None;
        }
        self.next += size;
        Some(chunk)
    }
}

/// Iterates the block descriptors of the region in creation order.
pub(crate) fn blocks(region: RawRegion) -> impl Iterator<Item = Block> {
    let header = RegionHeader::new(region);
    let first = header.first_block_offset();
    let count = u64::from(header.block_count());
    (0..count).map(move |i| Block::at(region, first + i * BLOCK_DESC_SIZE))
}

/// Finds the block whose byte range contains `offset`.
pub(crate) fn block_containing(region: RawRegion, offset: u64) -> Option<Block> {
    blocks(region).find(|block| block.contains(offset))
}
