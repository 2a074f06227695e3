//! Address-space arithmetic (component C1).
//!
//! A virtual address is split into one index per page-table level plus a
//! page offset. This module owns that split/join logic and the small set of
//! paging constants the rest of the crate builds on; nothing here touches a
//! lock or a page table.

use crate::error::{MmError, Result};

/// A (simulated) virtual address.
pub type VirtAddr = usize;

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Page-table entries per page-table page.
pub const ENTRIES_PER_PAGE: usize = 512;

/// Number of bits consumed by each level's index.
const BITS_PER_LEVEL: u32 = ENTRIES_PER_PAGE.trailing_zeros();

/// Default number of page-table levels (matching a 4-level x86_64-style walk).
pub const DEFAULT_LEVELS: usize = 4;

const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

/// Returns the highest virtual address (exclusive) addressable by a
/// `levels`-deep page table.
pub fn max_addr(levels: usize) -> VirtAddr {
    1usize << (PAGE_SHIFT + BITS_PER_LEVEL * levels as u32)
}

/// Checks that `addr` is within range for an address space with `levels`
/// page-table levels.
pub fn check_in_range(addr: VirtAddr, levels: usize) -> Result<()> {
    if addr >= max_addr(levels) {
        return Err(MmError::AddressOutOfRange(addr));
    }
    Ok(())
}

/// Rounds `addr` down to the start of its containing page.
pub fn page_align_down(addr: VirtAddr) -> VirtAddr {
    addr & !(PAGE_SIZE - 1)
}

/// Rounds `addr` up to the start of the next page, unless already aligned.
pub fn page_align_up(addr: VirtAddr) -> VirtAddr {
    page_align_down(addr + PAGE_SIZE - 1)
}

/// The page-table index for `addr` at the given `level`, where level 0 is
/// the leaf (page-frame) level and `levels - 1` is the root.
pub fn pte_index(addr: VirtAddr, level: usize) -> usize {
    let shift = PAGE_SHIFT + BITS_PER_LEVEL * level as u32;
    (addr >> shift) & (ENTRIES_PER_PAGE - 1)
}

/// Splits `addr` into one index per level, ordered from the root
/// (index `levels - 1`) down to the leaf (index `0`).
pub fn split(addr: VirtAddr, levels: usize) -> Vec<usize> {
    (0..levels).rev().map(|level| pte_index(addr, level)).collect()
}

/// Reassembles a virtual address from per-level indices ordered root-first,
/// the inverse of [`split`].
pub fn join(indices: &[usize]) -> VirtAddr {
    let levels = indices.len();
    indices
        .iter()
        .enumerate()
        .fold(0usize, |addr, (i, &idx)| {
            let level = levels - 1 - i;
            addr | (idx << (PAGE_SHIFT + BITS_PER_LEVEL * level as u32))
        })
}
