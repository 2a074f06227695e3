//! Page-table pages and their descriptors (component C4).
//!
//! This is where the design's central idea lives: there is no separate
//! VMA/region tree. A [`PageTablePage`] is simultaneously the hardware page
//! table (an array of [`HardwarePte`]) and the software bookkeeping for
//! every entry in it (an array of [`EntryMetadata`]), plus references to its
//! child pages. One [`Descriptor`] mutex guards both the entries and the
//! child-reference array together (invariant I6), so a writer mutating an
//! entry and a writer installing a child page can never race each other.
//!
//! "Lock-free descent" (design section 4.5, step 2) means a cursor never
//! holds more than one level's lock at a time while walking down: it locks
//! the current node just long enough to clone the `Arc` of the child it
//! wants, releases, then locks the child. Two concurrent descents down
//! disjoint subtrees never contend past the single node they both happen to
//! pass through, and no descent ever blocks on a lock chain the way a
//! single global address-space lock would.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::addr::ENTRIES_PER_PAGE;
use crate::metadata::EntryMetadata;
use crate::pte::HardwarePte;
use crate::sync::{ArcMutexGuard, Mutex, MutexGuard};

/// The mutable contents of a page-table page, guarded by a single mutex.
pub struct Inner {
    pub ptes: Vec<HardwarePte>,
    pub metadata: Vec<EntryMetadata>,
    pub children: Vec<Option<Arc<Descriptor>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            ptes: vec![HardwarePte::empty(); ENTRIES_PER_PAGE],
            metadata: vec![EntryMetadata::invalid(); ENTRIES_PER_PAGE],
            children: vec![None; ENTRIES_PER_PAGE],
        }
    }

    /// Number of child slots that currently hold a page table (not leaf
    /// frame mappings, which have no child descriptor).
    pub fn nr_valid_children(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }
}

/// A node in the page-table tree: one hardware page table page plus the
/// software metadata and child references that ride along with it.
///
/// Always accessed through `Arc<Descriptor>`; the tree is a DAG of these
/// shared, reference-counted nodes so a cursor can hold a child alive after
/// releasing its parent's lock.
pub struct Descriptor {
    level: usize,
    inner: Arc<Mutex<Inner>>,
    /// Set once this node has been detached from the tree (e.g. by
    /// `remove_page_table`). Monotonic: once true, always true (invariant
    /// I3). A cursor that cloned an `Arc` to this node before it went stale
    /// must re-validate after locking and restart its operation if it
    /// observes `stale`.
    stale: AtomicBool,
    /// Bumped on every structural change to this node's children array.
    /// Used by the DFS subtree-locking path to detect that a node changed
    /// shape between an unlocked peek and the locked acquisition.
    version: AtomicU64,
}

impl Descriptor {
    /// Creates a fresh, empty page-table page at `level` (0 = leaf level).
    pub fn new(level: usize) -> Arc<Self> {
        Arc::new(Self {
            level,
            inner: Arc::new(Mutex::new(Inner::new())),
            stale: AtomicBool::new(false),
            version: AtomicU64::new(0),
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_leaf_level(&self) -> bool {
        self.level == 0
    }

    /// Locks this node's entries and children for exclusive access, for
    /// the duration of `self`'s borrow.
    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Like [`Self::lock`], but the returned guard owns an `Arc` clone of
    /// the lock rather than borrowing it, so a [`crate::cursor::Cursor`]
    /// can hold it for the cursor's own lifetime.
    pub fn lock_arc(&self) -> ArcMutexGuard<Inner> {
        self.inner.lock_arc()
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Marks this node stale. Idempotent and one-way: calling it again, or
    /// on an already-stale node, has no further effect (invariant I3).
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Reads the child at `index` without acquiring the node's own lock.
    ///
    /// This is the "lock-free" half of a descent: the caller is expected to
    /// have already locked *this* node (so the read is not racing against a
    /// concurrent write to the very slot it's reading) but wants to hand
    /// back an `Arc` clone for the caller to then lock independently, after
    /// dropping this node's lock. Call sites pass the already-held guard in
    /// to make that ordering explicit.
    pub fn child_of<'a>(inner: &'a Inner, index: usize) -> Option<&'a Arc<Descriptor>> {
        inner.children[index].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_descriptor_has_no_children_and_is_not_stale() {
        let node = Descriptor::new(1);
        assert!(!node.is_stale());
        assert_eq!(node.lock().nr_valid_children(), 0);
    }

    #[test]
    fn mark_stale_is_idempotent_and_one_way() {
        let node = Descriptor::new(0);
        node.mark_stale();
        assert!(node.is_stale());
        node.mark_stale();
        assert!(node.is_stale());
    }

    #[test]
    fn installing_a_child_is_visible_through_the_shared_lock() {
        let parent = Descriptor::new(1);
        let child = Descriptor::new(0);
        {
            let mut inner = parent.lock();
            inner.children[3] = Some(child.clone());
        }
        let inner = parent.lock();
        assert_eq!(inner.nr_valid_children(), 1);
        assert!(Descriptor::child_of(&inner, 3).is_some());
        assert!(Descriptor::child_of(&inner, 4).is_none());
    }
}
