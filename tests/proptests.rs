//! Property tests for the invariants and properties the design calls out:
//! address arithmetic round-trips, PTE/metadata coherence (I4), and
//! COW refcount behavior under fork. These run against the public API only;
//! internal per-module properties (staleness monotonicity, entries+children
//! sharing one lock) are covered by `#[cfg(test)]` unit tests next to the
//! code they describe.

use cortenmm::ops::{fork_cow, handle_page_fault, mmap, munmap};
use cortenmm::{AddrSpace, SoftPerm};
use proptest::prelude::*;

const PAGE_SIZE: usize = 4096;
const LEAF_SPAN: usize = 512 * PAGE_SIZE;

fn page_aligned_addr() -> impl Strategy<Value = usize> {
    (0usize..256).prop_map(|i| i * PAGE_SIZE)
}

proptest! {
    /// P: splitting then joining a virtual address is the identity, for
    /// any address within a single leaf page's span.
    #[test]
    fn address_split_join_roundtrips(addr in 0usize..LEAF_SPAN) {
        let indices = cortenmm::addr::split(addr, cortenmm::addr::DEFAULT_LEVELS);
        prop_assert_eq!(cortenmm::addr::join(&indices), addr);
    }

    /// P: after mmap + a read fault, the PTE's present bit and the
    /// metadata's mapped-ness always agree (invariant I4), for any
    /// page-aligned address within one leaf page.
    #[test]
    fn pte_presence_matches_metadata_after_fault(addr in page_aligned_addr()) {
        let space = AddrSpace::new();
        mmap(&space, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
        handle_page_fault(&space, addr, false).unwrap();
        let cursor = space.scoped_lock(addr, addr + 1, false).unwrap();
        let (pte, meta) = cursor.query(addr).unwrap();
        prop_assert_eq!(pte.is_present(), meta.status.is_mapped() && meta.frame.is_some());
    }

    /// P: after munmap, the entry is back to not-present and Invalid,
    /// regardless of whether it was ever faulted in.
    #[test]
    fn munmap_always_returns_to_invalid(addr in page_aligned_addr(), fault_first in any::<bool>()) {
        let space = AddrSpace::new();
        mmap(&space, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
        if fault_first {
            handle_page_fault(&space, addr, false).unwrap();
        }
        munmap(&space, addr, PAGE_SIZE).unwrap();
        let cursor = space.scoped_lock(addr, addr + 1, false).unwrap();
        let (pte, meta) = cursor.query(addr).unwrap();
        prop_assert!(!pte.is_present());
        prop_assert!(meta.is_invalid());
    }

    /// P: fork_cow always leaves the shared frame's refcount at exactly 2
    /// (one parent entry, one child entry) immediately after forking a
    /// single faulted-in page, never more and never less. Invariant I5 also
    /// requires the entries' own `metadata.refcount` fields to sum to that
    /// same global count, not each mirror it.
    #[test]
    fn fork_cow_refcount_is_exactly_two(addr in page_aligned_addr()) {
        let parent = AddrSpace::new();
        mmap(&parent, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
        handle_page_fault(&parent, addr, true).unwrap();
        let child = parent.fork();
        fork_cow(&parent, &child, addr, addr + PAGE_SIZE).unwrap();

        let parent_cursor = parent.scoped_lock(addr, addr + 1, false).unwrap();
        let (parent_pte, parent_meta) = parent_cursor.query(addr).unwrap();
        let frame = parent_pte.frame().unwrap();
        prop_assert_eq!(parent.frames().refcount(frame), 2);

        let child_cursor = child.scoped_lock(addr, addr + 1, false).unwrap();
        let (_, child_meta) = child_cursor.query(addr).unwrap();
        prop_assert_eq!(parent_meta.refcount + child_meta.refcount, parent.frames().refcount(frame));
    }

    /// P: a write fault on a COW entry never leaves the PTE read-only
    /// afterward, whether it took the copy path or the in-place path.
    #[test]
    fn cow_write_fault_always_ends_writable(addr in page_aligned_addr()) {
        let parent = AddrSpace::new();
        mmap(&parent, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
        handle_page_fault(&parent, addr, true).unwrap();
        let child = parent.fork();
        fork_cow(&parent, &child, addr, addr + PAGE_SIZE).unwrap();

        handle_page_fault(&parent, addr, true).unwrap();
        let cursor = parent.scoped_lock(addr, addr + 1, false).unwrap();
        let (pte, meta) = cursor.query(addr).unwrap();
        prop_assert!(pte.is_writable());
        prop_assert_eq!(meta.status, cortenmm::Status::PrivateAnon);
    }
}
