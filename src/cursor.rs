//! The range cursor (component C8): the sole interface through which any
//! code is allowed to mutate the page-table tree.
//!
//! A [`Cursor`] is produced by [`crate::addrspace::AddrSpace::scoped_lock`]
//! already holding the locks it needs; callers never lock a
//! [`crate::node::Descriptor`] directly. Every lock the cursor acquired is
//! released exactly once, either by an explicit call to [`Cursor::release`]
//! or, if that was never called, by `Drop` — matching the teacher's cursor,
//! which relies on `Drop` to recycle guards on every exit path including an
//! early `?`-propagated error, rather than a manual try/finally.

use std::sync::Arc;

use crate::addr::{pte_index, VirtAddr, ENTRIES_PER_PAGE, PAGE_SIZE};
use crate::error::{MmError, Result};
use crate::frame::FrameNumber;
use crate::metadata::EntryMetadata;
use crate::node::Descriptor;
use crate::pte::HardwarePte;
use crate::reclaim::RcuReclaimer;
use crate::sync::ArcMutexGuard;

/// One locked page-table page held by a cursor, in root-to-leaf order.
pub(crate) struct LockedNode {
    pub node: Arc<Descriptor>,
    pub guard: ArcMutexGuard<crate::node::Inner>,
}

/// A scoped, lock-holding handle onto the leaf page-table page(s) covering
/// a virtual address range.
///
/// `deep` cursors additionally hold every node in the subtree rooted at
/// the locked leaf's ancestors down to (but not including) the leaf itself
/// locked for the cursor's lifetime, which is what lets `munmap` detach and
/// reclaim now-empty intermediate page-table pages atomically with respect
/// to concurrent lock-free descents.
pub struct Cursor {
    /// Root-to-leaf chain of locked nodes for the covered range. For a
    /// non-`deep` cursor this holds exactly the leaf-level node(s); for a
    /// `deep` cursor it holds every ancestor down to the leaf as well.
    pub(crate) chain: Vec<LockedNode>,
    pub(crate) levels: usize,
    /// The `[start, end)` virtual address range this cursor's leaf
    /// page-table page covers. Every operation below validates its `addr`
    /// argument against this range and raises
    /// [`MmError::AddressOutOfRange`] rather than indexing past it.
    start: VirtAddr,
    end: VirtAddr,
    reclaimer: Arc<RcuReclaimer>,
    released: bool,
}

impl Cursor {
    pub(crate) fn new(chain: Vec<LockedNode>, levels: usize, start: VirtAddr, end: VirtAddr, reclaimer: Arc<RcuReclaimer>) -> Self {
        Self {
            chain,
            levels,
            start,
            end,
            reclaimer,
            released: false,
        }
    }

    fn leaf(&self) -> &LockedNode {
        self.chain.last().expect("cursor always holds at least the leaf node")
    }

    fn leaf_mut(&mut self) -> &mut LockedNode {
        self.chain.last_mut().expect("cursor always holds at least the leaf node")
    }

    /// Checks that `addr` falls within `[self.start, self.end)`, this
    /// cursor's own covered range — not the address space's overall bound,
    /// which `AddrSpace::scoped_lock` already checked before this cursor
    /// was even created.
    fn check_in_range(&self, addr: VirtAddr) -> Result<()> {
        if addr < self.start || addr >= self.end {
            return Err(MmError::AddressOutOfRange(addr));
        }
        Ok(())
    }

    /// Reads the hardware PTE and software metadata for `addr` without
    /// modifying either.
    pub fn query(&self, addr: usize) -> Result<(HardwarePte, EntryMetadata)> {
        self.check_in_range(addr)?;
        let index = pte_index(addr, 0);
        let leaf = self.leaf();
        Ok((leaf.guard.ptes[index], leaf.guard.metadata[index].clone()))
    }

    /// Installs a mapping at `addr`, overwriting whatever was there.
    ///
    /// This is the single point through which a PTE and its metadata are
    /// ever written together, which is what keeps invariant I4 (PTE-present
    /// iff metadata says mapped-with-a-frame) from ever being observable in
    /// a torn state by another thread: both fields live in the same
    /// mutex-guarded `Inner`, and this function holds that mutex for the
    /// whole write.
    pub fn map(&mut self, addr: usize, pte: HardwarePte, metadata: EntryMetadata) -> Result<()> {
        self.check_in_range(addr)?;
        let index = pte_index(addr, 0);
        let leaf = self.leaf_mut();
        leaf.guard.ptes[index] = pte;
        leaf.guard.metadata[index] = metadata;
        Ok(())
    }

    /// Updates only the software metadata at `addr`, leaving the PTE as-is.
    /// Used for transitions that don't change hardware-visible state, e.g.
    /// downgrading `Mapped` to `COW` while the frame mapping is untouched.
    pub fn mark(&mut self, addr: usize, metadata: EntryMetadata) -> Result<()> {
        self.check_in_range(addr)?;
        let index = pte_index(addr, 0);
        self.leaf_mut().guard.metadata[index] = metadata;
        Ok(())
    }

    /// Clears both the PTE and metadata at `addr` back to empty/invalid.
    pub fn unmap(&mut self, addr: usize) -> Result<(HardwarePte, EntryMetadata)> {
        self.check_in_range(addr)?;
        let index = pte_index(addr, 0);
        let leaf = self.leaf_mut();
        let old_pte = std::mem::replace(&mut leaf.guard.ptes[index], HardwarePte::empty());
        let old_meta = std::mem::replace(&mut leaf.guard.metadata[index], EntryMetadata::invalid());
        Ok((old_pte, old_meta))
    }

    /// Clears every entry in `[start, end)` that falls within this cursor's
    /// leaf page, returning the frames that were mapped so the caller can
    /// drop their refcounts and schedule reclamation.
    pub fn unmap_range(&mut self, start: usize, end: usize) -> Result<Vec<FrameNumber>> {
        if start < self.start || end > self.end || start > end {
            return Err(MmError::AddressOutOfRange(start));
        }
        let mut freed = Vec::new();
        let leaf = self.leaf_mut();
        let first = pte_index(start, 0);
        let last = pte_index((end - 1).max(start), 0);
        for index in first..=last.min(ENTRIES_PER_PAGE - 1) {
            if let Some(frame) = leaf.guard.ptes[index].frame() {
                freed.push(frame);
            }
            leaf.guard.ptes[index] = HardwarePte::empty();
            leaf.guard.metadata[index] = EntryMetadata::invalid();
        }
        Ok(freed)
    }

    pub fn get_pte_and_metadata(&self, addr: usize) -> Result<(HardwarePte, EntryMetadata)> {
        self.query(addr)
    }

    /// True if every entry in this cursor's leaf page is [`crate::metadata::Status::Invalid`].
    ///
    /// `munmap` uses this to decide whether the leaf page-table page itself
    /// can now be detached and handed to the reclaimer.
    pub fn is_leaf_empty(&self) -> bool {
        self.leaf().guard.metadata.iter().all(|meta| meta.is_invalid())
    }

    /// The virtual address range, in bytes, covered by this cursor's leaf
    /// page-table page.
    pub fn leaf_span(&self) -> usize {
        ENTRIES_PER_PAGE * PAGE_SIZE
    }

    /// Releases every lock this cursor holds, then gives the address
    /// space's reclaimer a chance to drop anything whose grace period has
    /// since elapsed — the cursor's exit is the natural point to nudge it,
    /// since it's the one place every lock this cursor held is known gone.
    ///
    /// Idempotent: calling it twice, or letting `Drop` call it after an
    /// explicit call already did, is not a protocol violation and simply
    /// does nothing the second time.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.chain.clear();
        self.released = true;
        self.reclaimer.try_reclaim();
    }

    /// Returns an error instead of silently no-oping if the cursor was
    /// already released, for call sites that want to treat a double
    /// release as the caller's bug rather than ignore it.
    pub fn release_checked(&mut self) -> Result<()> {
        if self.released {
            return Err(MmError::ProtocolViolation("cursor released twice"));
        }
        self.release();
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Status;

    fn single_leaf_cursor() -> Cursor {
        let node = Descriptor::new(0);
        let guard = node.lock_arc();
        let reclaimer = Arc::new(RcuReclaimer::new());
        Cursor::new(vec![LockedNode { node, guard }], 1, 0, ENTRIES_PER_PAGE * PAGE_SIZE, reclaimer)
    }

    #[test]
    fn map_then_query_roundtrips() {
        let mut cursor = single_leaf_cursor();
        let frame = FrameNumber::new(5);
        let pte = HardwarePte::present(frame, true, true);
        let mut meta = EntryMetadata::invalid();
        meta.status = Status::Mapped;
        meta.frame = Some(frame);
        cursor.map(0x2000, pte, meta.clone()).unwrap();
        let (got_pte, got_meta) = cursor.query(0x2000).unwrap();
        assert_eq!(got_pte.frame(), Some(frame));
        assert_eq!(got_meta.status, Status::Mapped);
    }

    #[test]
    fn unmap_clears_entry_and_returns_old_state() {
        let mut cursor = single_leaf_cursor();
        let frame = FrameNumber::new(9);
        cursor
            .map(0x3000, HardwarePte::present(frame, true, true), {
                let mut m = EntryMetadata::invalid();
                m.status = Status::Mapped;
                m.frame = Some(frame);
                m
            })
            .unwrap();
        let (old_pte, old_meta) = cursor.unmap(0x3000).unwrap();
        assert_eq!(old_pte.frame(), Some(frame));
        assert_eq!(old_meta.status, Status::Mapped);
        let (now_pte, now_meta) = cursor.query(0x3000).unwrap();
        assert!(!now_pte.is_present());
        assert!(now_meta.is_invalid());
    }

    #[test]
    fn query_outside_the_cursors_range_is_rejected() {
        let cursor = single_leaf_cursor();
        assert!(cursor.query(ENTRIES_PER_PAGE * PAGE_SIZE).is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let mut cursor = single_leaf_cursor();
        cursor.release();
        cursor.release();
        assert!(cursor.chain.is_empty());
    }

    #[test]
    fn double_release_checked_is_a_protocol_violation() {
        let mut cursor = single_leaf_cursor();
        cursor.release_checked().unwrap();
        assert!(cursor.release_checked().is_err());
    }
}
