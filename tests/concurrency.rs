//! Concurrency tests exercising the locking protocol directly: disjoint
//! ranges should make progress without contending on a shared lock, and
//! racing mmap/page-fault/munmap calls across an address space must never
//! panic, deadlock, or leave the tree in a state the API itself can't
//! explain.

use std::sync::Arc;
use std::thread;

use cortenmm::ops::{handle_page_fault, mmap, munmap};
use cortenmm::{AddrSpace, SoftPerm};

const PAGE_SIZE: usize = 4096;

#[test]
fn concurrent_access_to_disjoint_ranges_all_succeed() {
    let space = Arc::new(AddrSpace::new());
    let addrs: Vec<usize> = (0..8).map(|i| 0x1_0000_0000 + i * PAGE_SIZE).collect();
    for &addr in &addrs {
        mmap(&space, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
    }

    let handles: Vec<_> = addrs
        .iter()
        .copied()
        .map(|addr| {
            let space = space.clone();
            thread::spawn(move || handle_page_fault(&space, addr, true).unwrap())
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    for &addr in &addrs {
        let cursor = space.scoped_lock(addr, addr + 1, false).unwrap();
        assert!(cursor.query(addr).unwrap().0.is_present());
    }
}

#[test]
fn concurrent_mmap_across_many_leaf_pages_never_panics() {
    let space = Arc::new(AddrSpace::new());
    let leaf_span = space.leaf_span();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let space = space.clone();
            thread::spawn(move || {
                let base = i * leaf_span;
                mmap(&space, base, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
                handle_page_fault(&space, base, true).unwrap();
                munmap(&space, base, PAGE_SIZE).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_faults_on_the_same_page_each_see_a_consistent_state() {
    // Two threads both fault on the same lazily-mapped page. Whichever
    // gets there first allocates the frame; the other observes a
    // consistent Mapped entry rather than racing on a half-written PTE.
    let space = Arc::new(AddrSpace::new());
    let addr = 0x2_0000_0000;
    mmap(&space, addr, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let space = space.clone();
            thread::spawn(move || handle_page_fault(&space, addr, false).unwrap())
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let cursor = space.scoped_lock(addr, addr + 1, false).unwrap();
    let (pte, meta) = cursor.query(addr).unwrap();
    assert!(pte.is_present());
    assert_eq!(meta.status, cortenmm::Status::Mapped);
}
