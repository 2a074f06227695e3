//! Address spaces and the fine-grained locking protocol (component C6).
//!
//! An [`AddrSpace`] owns the root of the page-table tree along with the
//! frame allocator and RCU reclaimer every [`crate::cursor::Cursor`] it
//! produces shares. [`AddrSpace::scoped_lock`] is the advanced locking
//! protocol at the heart of the design: lock-free descent down to the
//! target leaf page, a lock-and-validate step that detects a concurrent
//! detach and retries, and (for `deep` cursors) DFS subtree locking that
//! holds every ancestor node down to the leaf so a structural change
//! (removing a now-empty intermediate page table) is atomic with respect
//! to other descents.
//!
//! Lock ordering, least to most contended: the structural mutex (taken only
//! while installing or removing an intermediate page-table page) is always
//! acquired before any page-descriptor mutex; descriptor mutexes are always
//! acquired parent-before-child, ascending index within a level; the frame
//! allocator's mutex and the reclaimer's mutex are always acquired last,
//! after every descriptor lock a given operation needs. A descriptor lock
//! may be taken while the structural mutex is held; the reverse never
//! happens.

use std::sync::Arc;

use crate::addr::{self, pte_index, VirtAddr, ENTRIES_PER_PAGE, PAGE_SIZE};
use crate::cursor::{Cursor, LockedNode};
use crate::error::{MmError, Result};
use crate::frame::FrameAllocator;
use crate::node::Descriptor;
use crate::reclaim::RcuReclaimer;
use crate::sync::Mutex;

/// Maximum number of times `scoped_lock` will retry a descent that lost the
/// race against a concurrent structural change before giving up.
const MAX_LOCK_RETRIES: u32 = 10;

/// A single simulated virtual address space: one page-table tree plus the
/// shared frame allocator and reclaimer every cursor over it uses.
///
/// The frame allocator and reclaimer are held behind `Arc` rather than
/// owned outright, because [`AddrSpace::fork`] creates a second address
/// space — a second page-table tree — that must still draw frame numbers
/// from, and share COW refcounts with, the same underlying pool as its
/// parent.
pub struct AddrSpace {
    root: Arc<Descriptor>,
    levels: usize,
    /// Guards structural changes to the tree shape (installing or removing
    /// an intermediate page-table page). Never guards entry/PTE mutation;
    /// that's each node's own descriptor lock.
    structural: Mutex<()>,
    frames: Arc<FrameAllocator>,
    reclaimer: Arc<RcuReclaimer>,
}

impl AddrSpace {
    /// Creates an address space with the default number of page-table
    /// levels ([`crate::addr::DEFAULT_LEVELS`]) and its own fresh frame
    /// allocator and reclaimer.
    pub fn new() -> Self {
        Self::with_levels(addr::DEFAULT_LEVELS)
    }

    pub fn with_levels(levels: usize) -> Self {
        Self {
            root: Descriptor::new(levels - 1),
            levels,
            structural: Mutex::new(()),
            frames: Arc::new(FrameAllocator::new()),
            reclaimer: Arc::new(RcuReclaimer::new()),
        }
    }

    /// Creates a new, empty address space that shares this one's frame
    /// allocator and reclaimer, for [`crate::ops::fork_cow`] to populate.
    pub fn fork(&self) -> Self {
        Self {
            root: Descriptor::new(self.levels - 1),
            levels: self.levels,
            structural: Mutex::new(()),
            frames: self.frames.clone(),
            reclaimer: self.reclaimer.clone(),
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn reclaimer(&self) -> &RcuReclaimer {
        &self.reclaimer
    }

    /// Bytes covered by a single leaf-level page-table page.
    pub fn leaf_span(&self) -> usize {
        ENTRIES_PER_PAGE * PAGE_SIZE
    }

    /// Acquires a [`Cursor`] over the leaf page-table page covering `addr`,
    /// creating any missing intermediate page-table pages along the way.
    ///
    /// `start`/`end` must both fall within the same leaf page's span; the
    /// higher-level mapping operations in [`crate::ops`] are responsible
    /// for splitting a larger range into leaf-sized chunks and calling
    /// this once per chunk. `deep` additionally retains every ancestor's
    /// lock for the cursor's lifetime, for operations (like detaching an
    /// emptied intermediate page table) that must hold the whole chain.
    pub fn scoped_lock(&self, start: VirtAddr, end: VirtAddr, deep: bool) -> Result<Cursor> {
        addr::check_in_range(start, self.levels)?;
        if end > 0 {
            addr::check_in_range(end - 1, self.levels)?;
        }
        let span = self.leaf_span();
        if end > start && addr::page_align_down(start) / span != addr::page_align_down(end - 1) / span {
            return Err(MmError::ProtocolViolation(
                "scoped_lock range crosses a leaf page-table page boundary",
            ));
        }

        for attempt in 0..MAX_LOCK_RETRIES {
            match self.try_scoped_lock(start, deep) {
                Some(cursor) => return Ok(cursor),
                None => {
                    log::debug!("scoped_lock: retry {attempt} for addr {start:#x} after stale read");
                }
            }
        }
        log::warn!("scoped_lock: giving up on addr {start:#x} after {MAX_LOCK_RETRIES} retries");
        Err(MmError::LockAcquisitionFailed)
    }

    /// One attempt at the descend-and-validate protocol. Returns `None` if
    /// a concurrent structural change made the path stale, signalling the
    /// caller should retry from the root.
    fn try_scoped_lock(&self, addr: VirtAddr, deep: bool) -> Option<Cursor> {
        let indices = crate::addr::split(addr, self.levels);
        let mut chain: Vec<LockedNode> = Vec::with_capacity(self.levels);
        let mut current = self.root.clone();

        for (depth, &index) in indices.iter().enumerate() {
            let is_leaf_step = depth == self.levels - 1;

            // Lock-free half: briefly lock the current node just to read
            // (or install) the child reference, then release before
            // locking the child itself. No two levels' locks are held
            // simultaneously here except in `deep` mode, where we keep
            // this node's guard in `chain` instead of dropping it.
            let child = if is_leaf_step {
                None
            } else {
                let mut guard = current.lock_arc();
                if current.is_stale() {
                    return None;
                }
                let existing = guard.children[index].clone();
                let child = match existing {
                    Some(child) => child,
                    None => self.install_child(&current, &mut guard, index),
                };
                if deep {
                    chain.push(LockedNode {
                        node: current.clone(),
                        guard,
                    });
                }
                Some(child)
            };

            if let Some(child) = child {
                current = child;
            } else {
                // Leaf step: take and keep the real lock, then validate.
                let guard = current.lock_arc();
                if current.is_stale() {
                    return None;
                }
                chain.push(LockedNode {
                    node: current.clone(),
                    guard,
                });
            }
        }

        let span = self.leaf_span();
        let leaf_start = addr & !(span - 1);
        let leaf_end = leaf_start + span;
        Some(Cursor::new(chain, self.levels, leaf_start, leaf_end, self.reclaimer.clone()))
    }

    /// Installs a fresh child page-table page at `index` under `parent`.
    ///
    /// `parent`'s own descriptor lock (the `guard` the caller already
    /// holds) is all the exclusivity this needs: invariant I6 says that
    /// lock already protects the children array, so two threads racing to
    /// fill the same empty slot serialize on acquiring it, and the second
    /// one in sees the slot already filled. No separate structural lock is
    /// taken here, which keeps this path from ever holding a descriptor
    /// lock and then reaching for the structural mutex (the ordering the
    /// design forbids — see the module-level lock-ordering note).
    fn install_child(
        &self,
        parent: &std::sync::Arc<Descriptor>,
        guard: &mut crate::sync::ArcMutexGuard<crate::node::Inner>,
        index: usize,
    ) -> std::sync::Arc<Descriptor> {
        if let Some(existing) = &guard.children[index] {
            return existing.clone();
        }
        let child = Descriptor::new(parent.level() - 1);
        guard.children[index] = Some(child.clone());
        parent.bump_version();
        child
    }

    /// Detaches the (now expected to be empty) intermediate page-table page
    /// at `addr`'s path, marking it stale and handing it to the RCU
    /// reclaimer rather than dropping it immediately, since a concurrent
    /// lock-free descent may hold a clone of its `Arc` already.
    ///
    /// Returns `Ok(true)` if a page table was actually removed, `Ok(false)`
    /// if the slot was already empty.
    pub fn remove_page_table(&self, addr: VirtAddr) -> Result<bool> {
        addr::check_in_range(addr, self.levels)?;
        if self.levels < 2 {
            return Ok(false);
        }
        // Structural mutex first, descriptor locks second: this serializes
        // concurrent detaches against each other before `scoped_lock` goes
        // on to take the (already install-safe) descriptor locks.
        let _structural = self.structural.lock();
        let mut cursor = self.scoped_lock(addr, addr + 1, true)?;
        // `chain` is root-to-leaf; the leaf's parent is the second-to-last
        // entry (or, for a 2-level tree, the root itself).
        let parent_depth = cursor.chain.len().saturating_sub(2);
        let leaf_index = pte_index(addr, 1);
        let Some(parent) = cursor.chain.get_mut(parent_depth) else {
            return Ok(false);
        };
        let removed_child = parent.guard.children[leaf_index].take();
        let parent_node = parent.node.clone();
        match removed_child {
            Some(child) => {
                child.mark_stale();
                parent_node.bump_version();
                log::debug!("remove_page_table: detached page table at {addr:#x}, deferring reclaim");
                self.reclaimer.defer_free(child);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for AddrSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lock_creates_missing_intermediate_tables() {
        let space = AddrSpace::new();
        let cursor = space.scoped_lock(0x1000, 0x2000, false).unwrap();
        assert_eq!(cursor.chain.len(), 1);
    }

    #[test]
    fn scoped_lock_rejects_out_of_range_addresses() {
        let space = AddrSpace::new();
        let too_far = addr::max_addr(space.levels());
        assert!(space.scoped_lock(too_far, too_far + 1, false).is_err());
    }

    #[test]
    fn scoped_lock_rejects_ranges_crossing_a_leaf_page() {
        let space = AddrSpace::new();
        let span = space.leaf_span();
        assert!(space.scoped_lock(span - PAGE_SIZE, span + PAGE_SIZE, false).is_err());
    }

    #[test]
    fn deep_scoped_lock_retains_the_whole_ancestor_chain() {
        let space = AddrSpace::new();
        let cursor = space.scoped_lock(0x1000, 0x2000, true).unwrap();
        assert_eq!(cursor.chain.len(), space.levels());
    }

    #[test]
    fn repeated_scoped_lock_reuses_the_same_leaf_node() {
        let space = AddrSpace::new();
        {
            let _cursor = space.scoped_lock(0x1000, 0x2000, false).unwrap();
        }
        let cursor = space.scoped_lock(0x1000, 0x2000, false).unwrap();
        assert_eq!(cursor.chain.len(), 1);
    }
}
