//! Region structure validation.
//!
//! The validator walks every block twice, once physically chunk by chunk
//! and once along the free list, and cross-checks the two views against
//! each other and against the header counters. It never repairs anything;
//! damage is tallied and reported.

use permem_common::constants::{
    ALLOC_ALIGN, BLOCK_DESC_SIZE, CHUNK_HEADER_SIZE, REGION_HEADER_SIZE, REGION_MAGIC,
    REGION_VERSION,
};

use crate::alloc::block::Block;
use crate::alloc::chunk::{Chunk, ChunkState};
use crate::region::header::RegionHeader;
use crate::region::RawRegion;

/// Tally of everything a validation walk found.
///
/// A fully healthy region has all error counters at zero;
/// [`is_valid`](Self::is_valid) is that reduction. The chunk statistics are
/// filled in regardless, as far as the walk got.
#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    /// Header problems: bad magic, version, sizes, or impossible counters.
    pub header_errors: usize,
    /// Malformed chunks: zero, misaligned, or overrunning sizes; unknown
    /// state bytes.
    pub chunk_errors: usize,
    /// Block-level problems: descriptors out of order, overlapping, or
    /// chunks not summing to the block size.
    pub layout_errors: usize,
    /// Free-list problems: broken or out-of-order links, list entries that
    /// are not free chunks, or free chunks missing from the list.
    pub freelist_errors: usize,
    /// Header counters disagreeing with the walk.
    pub counter_errors: usize,

    /// Total chunks seen.
    pub total_chunks: usize,
    /// Chunks in the FREE state.
    pub free_chunks: usize,
    /// Chunks in the USED state.
    pub used_chunks: usize,
}

impl ValidationReport {
    /// Returns true if no error of any kind was found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    /// Total number of errors across all categories.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.header_errors
            + self.chunk_errors
            + self.layout_errors
            + self.freelist_errors
            + self.counter_errors
    }
}

/// Walks the whole region and verifies every structural invariant.
pub(crate) fn validate_region(region: RawRegion) -> ValidationReport {
    let mut report = ValidationReport::default();
    let len = region.len() as u64;
    let header = RegionHeader::new(region);

    // Header identity and self-consistency
    if header.magic() != REGION_MAGIC {
        report.header_errors += 1;
    }
    if header.version() != REGION_VERSION {
        report.header_errors += 1;
    }
    if u64::from(header.header_size()) != REGION_HEADER_SIZE {
        report.header_errors += 1;
    }
    if header.region_size() != len {
        report.header_errors += 1;
    }
    if header.free_size() > len.saturating_sub(REGION_HEADER_SIZE) {
        report.header_errors += 1;
    }

    let block_count = u64::from(header.block_count());
    let first_block = header.first_block_offset();
    let table_end = first_block.saturating_add(block_count * BLOCK_DESC_SIZE);
    if block_count == 0 || first_block < REGION_HEADER_SIZE || table_end > len {
        report.header_errors += 1;
        // Without a trustworthy block table there is nothing left to walk.
        return report;
    }

    let mut free_payload_total = 0u64;
    let mut used_total = 0u64;
    let mut prev_block_end = 0u64;

    for i in 0..block_count {
        let block = Block::at(region, first_block + i * BLOCK_DESC_SIZE);
        let base = block.base_offset();
        let size = block.size();
        let end = base + size;

        // Blocks sit past the descriptor table, in ascending order, inside
        // the region.
        if base < table_end || base < prev_block_end || end > len || base % ALLOC_ALIGN != 0 {
            report.layout_errors += 1;
            continue;
        }
        prev_block_end = end;

        let free_in_block = walk_chunks(region, &block, &mut report, &mut free_payload_total, &mut used_total);
        walk_free_list(region, &block, &free_in_block, &mut report);
    }

    // Counters must agree with the walk
    if header.free_size() != free_payload_total {
        report.counter_errors += 1;
    }
    if header.allocated_count() != used_total {
        report.counter_errors += 1;
    }

    report
}

/// Physical walk: verifies chunk geometry and states, returning the offsets
/// of the FREE chunks in physical (= ascending offset) order.
fn walk_chunks(
    region: RawRegion,
    block: &Block,
    report: &mut ValidationReport,
    free_payload_total: &mut u64,
    used_total: &mut u64,
) -> Vec<u64> {
    let end = block.end_offset();
    let mut free_offsets = Vec::new();
    let mut off = block.base_offset();

    while off < end {
        let chunk = Chunk::at(region, off);
        let size = chunk.size();
        if size < CHUNK_HEADER_SIZE || size % ALLOC_ALIGN != 0 || off + size > end {
            report.chunk_errors += 1;
            return free_offsets;
        }

        report.total_chunks += 1;
        match chunk.state() {
            Some(ChunkState::Free) => {
                report.free_chunks += 1;
                free_offsets.push(off);
                *free_payload_total += size - CHUNK_HEADER_SIZE;
            }
            Some(ChunkState::Used) => {
                report.used_chunks += 1;
                *used_total += 1;
            }
            None => {
                report.chunk_errors += 1;
            }
        }
        off += size;
    }

    // Reaching here means off == end: the chunks tile the block exactly,
    // since any overrun already returned above.
    free_offsets
}

/// Free-list walk: the links must form a doubly-linked list visiting
/// exactly the FREE chunks in ascending offset order.
fn walk_free_list(
    region: RawRegion,
    block: &Block,
    expected: &[u64],
    report: &mut ValidationReport,
) {
    let mut seen = 0usize;
    let mut prev = 0u64;
    let mut cursor = block.free_head();

    while cursor != 0 {
        // A cursor escaping the block, landing misaligned, or running past
        // the expected population means the links are damaged (the length
        // bound also breaks link cycles).
        if !block.contains(cursor) || cursor % ALLOC_ALIGN != 0 || seen >= expected.len() {
            report.freelist_errors += 1;
            return;
        }
        let chunk = Chunk::at(region, cursor);
        if !chunk.is_free() {
            report.freelist_errors += 1;
        }
        if chunk.prev_free() != prev {
            report.freelist_errors += 1;
        }
        if expected[seen] != cursor {
            report.freelist_errors += 1;
        }
        prev = cursor;
        seen += 1;
        cursor = chunk.next_free();
    }

    if seen != expected.len() {
        report.freelist_errors += 1;
    }
}
