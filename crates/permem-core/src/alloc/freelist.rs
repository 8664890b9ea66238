//! Free-list allocation over region chunks.
//!
//! Policy summary:
//!
//! - **Selection**: first-fit, blocks tried in creation order.
//! - **Split**: a found chunk is split when the remainder would be a viable
//!   free chunk (at least `MIN_CHUNK_SIZE`); the remainder takes the
//!   original's place in the offset-ordered free list.
//! - **Coalesce**: on free, a chunk merges with physically adjacent free
//!   neighbors. The offset-ordered links make adjacency checks O(1) once
//!   the chunk is linked in.
//! - **Reallocate**: shrink in place (splitting off the tail when it pays),
//!   grow in place by absorbing the trailing free neighbor, otherwise
//!   allocate-copy-free, leaving the original untouched on failure.

use tracing::trace;

use permem_common::constants::{
    align_up, ALLOC_ALIGN, BLOCK_DESC_SIZE, CHUNK_HEADER_SIZE, MIN_CHUNK_SIZE, REGION_HEADER_SIZE,
};
use permem_common::error::{PermemError, PermemResult};
use permem_common::types::RawOffset;

use crate::region::header::RegionHeader;
use crate::region::RawRegion;

use super::block::{block_containing, blocks, Block};
use super::chunk::{Chunk, ChunkState};

/// Total chunk size needed to satisfy a payload request of `size` bytes.
///
/// Payloads are rounded up to the allocation alignment; a zero-byte request
/// still occupies one alignment unit so every live payload has a distinct
/// offset.
#[inline]
fn request_size(size: u64) -> u64 {
    align_up(size.max(1)) + CHUNK_HEADER_SIZE
}

/// Initializes a fresh region: header, one block descriptor, and one free
/// chunk spanning the whole dynamic area.
///
/// The caller has already checked the region size and alignment.
pub(crate) fn format_region(region: RawRegion) {
    let len = region.len() as u64;
    let block_base = REGION_HEADER_SIZE + BLOCK_DESC_SIZE;
    let block_size = len - block_base;

    let header = RegionHeader::new(region);
    header.initialize();
    header.set_block_count(1);
    header.set_first_block_offset(REGION_HEADER_SIZE);
    header.set_allocated_count(0);
    header.set_free_size(block_size - CHUNK_HEADER_SIZE);

    let block = Block::at(region, REGION_HEADER_SIZE);
    block.initialize(block_base, block_size);
    block.set_free_head(block_base);

    Chunk::at(region, block_base).init_free(block_size, 0, 0);
}

/// Allocates `size` payload bytes; returns the payload offset.
pub(crate) fn allocate(region: RawRegion, size: u64) -> PermemResult<RawOffset> {
    // A request as large as the region can never fit past the metadata;
    // rejecting it here also keeps the rounding below overflow-free.
    if size >= region.len() as u64 {
        return Err(PermemError::OutOfMemory { requested: size });
    }
    let need = request_size(size);
    for block in blocks(region) {
        if let Some(chunk) = block.first_fit(need) {
            let payload = claim(region, &block, chunk, need);
            return Ok(RawOffset::new(payload));
        }
    }
    trace!(requested = size, "no free chunk fits the request");
    Err(PermemError::OutOfMemory { requested: size })
}

/// Turns the free `chunk` into a used chunk of `need` bytes, splitting off
/// the remainder when it is large enough to stand alone.
fn claim(region: RawRegion, block: &Block, chunk: Chunk, need: u64) -> u64 {
    let header = RegionHeader::new(region);
    let total = chunk.size();

    if total >= need + MIN_CHUNK_SIZE {
        // Split: the upper remainder takes the chunk's place in the list.
        let rest = Chunk::at(region, chunk.offset() + need);
        rest.init_free(total - need, chunk.next_free(), chunk.prev_free());
        if chunk.prev_free() == 0 {
            block.set_free_head(rest.offset());
        } else {
            Chunk::at(region, chunk.prev_free()).set_next_free(rest.offset());
        }
        if chunk.next_free() != 0 {
            Chunk::at(region, chunk.next_free()).set_prev_free(rest.offset());
        }
        chunk.set_size(need);
        header.set_free_size(header.free_size() - need);
    } else {
        // The whole chunk goes; up to MIN_CHUNK_SIZE - 1 bytes of slack.
        block.unlink_free(&chunk);
        header.set_free_size(header.free_size() - chunk.payload_capacity());
    }

    chunk.set_state(ChunkState::Used);
    chunk.set_next_free(0);
    chunk.set_prev_free(0);
    header.set_allocated_count(header.allocated_count() + 1);
    chunk.payload_offset()
}

/// Frees the payload at `offset`. Freeing the null offset is a no-op.
pub(crate) fn deallocate(region: RawRegion, offset: RawOffset) -> PermemResult<()> {
    if offset.is_null() {
        return Ok(());
    }
    let chunk = live_chunk(region, offset)?;
    let block = block_containing(region, chunk.offset())
        .ok_or(PermemError::InvalidOffset {
            offset: offset.as_u64(),
        })?;

    let header = RegionHeader::new(region);
    chunk.set_state(ChunkState::Free);
    header.set_allocated_count(header.allocated_count() - 1);
    header.set_free_size(header.free_size() + chunk.payload_capacity());

    block.insert_free(chunk);
    coalesce(region, chunk);
    Ok(())
}

/// Merges a just-inserted free `chunk` with physically adjacent free
/// neighbors. Membership is read off the offset-ordered links, so only the
/// two list neighbors need checking. Head updates never arise: absorbing
/// the successor keeps `chunk` in place, and being absorbed requires a
/// predecessor.
fn coalesce(region: RawRegion, chunk: Chunk) {
    let header = RegionHeader::new(region);

    // Successor first: absorb it into `chunk`.
    let next_off = chunk.next_free();
    if next_off != 0 && chunk.end_offset() == next_off {
        let next = Chunk::at(region, next_off);
        chunk.set_size(chunk.size() + next.size());
        chunk.set_next_free(next.next_free());
        if next.next_free() != 0 {
            Chunk::at(region, next.next_free()).set_prev_free(chunk.offset());
        }
        header.set_free_size(header.free_size() + CHUNK_HEADER_SIZE);
    }

    // Then the predecessor: absorb `chunk` into it.
    let prev_off = chunk.prev_free();
    if prev_off != 0 {
        let prev = Chunk::at(region, prev_off);
        if prev.end_offset() == chunk.offset() {
            prev.set_size(prev.size() + chunk.size());
            prev.set_next_free(chunk.next_free());
            if chunk.next_free() != 0 {
                Chunk::at(region, chunk.next_free()).set_prev_free(prev.offset());
            }
            header.set_free_size(header.free_size() + CHUNK_HEADER_SIZE);
        }
    }
}

/// Resizes the allocation at `offset` to `new_size` payload bytes.
///
/// Null offset acts as `allocate`; zero size acts as `deallocate` and
/// returns null. Otherwise the chunk is resized in place when possible,
/// and moved as a last resort.
pub(crate) fn reallocate(
    region: RawRegion,
    offset: RawOffset,
    new_size: u64,
) -> PermemResult<RawOffset> {
    if offset.is_null() {
        return allocate(region, new_size);
    }
    if new_size == 0 {
        deallocate(region, offset)?;
        return Ok(RawOffset::NULL);
    }
    if new_size >= region.len() as u64 {
        return Err(PermemError::OutOfMemory {
            requested: new_size,
        });
    }

    let chunk = live_chunk(region, offset)?;
    let block = block_containing(region, chunk.offset())
        .ok_or(PermemError::InvalidOffset {
            offset: offset.as_u64(),
        })?;
    let header = RegionHeader::new(region);
    let need = request_size(new_size);
    let total = chunk.size();

    // Fits in place; shrink by splitting off the tail when it pays.
    if need <= total {
        if total - need >= MIN_CHUNK_SIZE {
            chunk.set_size(need);
            release_tail(region, &block, chunk.offset() + need, total - need);
        }
        return Ok(offset);
    }

    // Grow in place by absorbing the physically adjacent trailing free chunk.
    let next_off = chunk.end_offset();
    if next_off < block.end_offset() {
        let next = Chunk::at(region, next_off);
        if next.is_free() && total + next.size() >= need {
            block.unlink_free(&next);
            header.set_free_size(header.free_size() - next.payload_capacity());
            let combined = total + next.size();
            if combined - need >= MIN_CHUNK_SIZE {
                chunk.set_size(need);
                release_tail(region, &block, chunk.offset() + need, combined - need);
            } else {
                chunk.set_size(combined);
            }
            return Ok(offset);
        }
    }

    // Move: allocate fresh, copy the surviving payload, free the old chunk.
    // On allocation failure the original is untouched.
    let new_offset = allocate(region, new_size)?;
    let copy_len = chunk.payload_capacity().min(new_size);
    region.copy_payload(offset.as_u64(), new_offset.as_u64(), copy_len);
    deallocate(region, offset)?;
    trace!(
        old = offset.as_u64(),
        new = new_offset.as_u64(),
        "reallocation moved payload"
    );
    Ok(new_offset)
}

/// Makes `[tail_offset, tail_offset + tail_size)` a free chunk, linked and
/// coalesced forward.
fn release_tail(region: RawRegion, block: &Block, tail_offset: u64, tail_size: u64) {
    let header = RegionHeader::new(region);
    let tail = Chunk::at(region, tail_offset);
    tail.init_free(tail_size, 0, 0);
    header.set_free_size(header.free_size() + tail.payload_capacity());
    block.insert_free(tail);
    coalesce(region, tail);
}

/// Looks up the used chunk owning the payload at `offset`, rejecting
/// offsets that are out of range, misaligned, or do not name a live
/// allocation. Plausible-but-stale offsets past this filter are the
/// caller's responsibility.
fn live_chunk(region: RawRegion, offset: RawOffset) -> PermemResult<Chunk> {
    let off = offset.as_u64();
    let invalid = PermemError::InvalidOffset { offset: off };

    let min_payload = REGION_HEADER_SIZE + BLOCK_DESC_SIZE + CHUNK_HEADER_SIZE;
    if off % ALLOC_ALIGN != 0 || off < min_payload || off >= region.len() as u64 {
        return Err(invalid);
    }
    let chunk = Chunk::from_payload(region, off);
    match chunk.state() {
        Some(ChunkState::Used) => Ok(chunk),
        _ => Err(invalid),
    }
}
