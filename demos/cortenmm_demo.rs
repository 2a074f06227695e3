//! A small illustrative driver for the `cortenmm` library, external to the
//! crate proper. It walks through four scenarios that exercise the
//! mechanisms the library is actually about: a lazy mapping that defers
//! frame allocation until first touch, fork's copy-on-write setup, a true
//! (refcount > 1) COW resolution, and two threads mapping disjoint ranges
//! of the same address space concurrently.
//!
//! This binary is not part of the library's public API; it exists only to
//! give a human something to run and read logs from.

use std::sync::Arc;
use std::thread;

use cortenmm::ops::{fork_cow, handle_page_fault, mmap, munmap};
use cortenmm::{AddrSpace, SoftPerm};

const PAGE_SIZE: usize = 4096;

fn scenario_lazy_mapping() {
    log::info!("--- scenario: lazy mapping ---");
    let space = AddrSpace::new();
    mmap(&space, 0x40000, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
    log::info!("mmap installed a PrivateAnon entry with no frame yet");
    handle_page_fault(&space, 0x40000, false).unwrap();
    log::info!("first access allocated a frame and promoted the entry to Mapped");
}

fn scenario_fork_cow() {
    log::info!("--- scenario: fork copy-on-write ---");
    let parent = AddrSpace::new();
    mmap(&parent, 0x50000, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
    handle_page_fault(&parent, 0x50000, true).unwrap();
    let child = parent.fork();
    fork_cow(&parent, &child, 0x50000, 0x50000 + PAGE_SIZE).unwrap();
    log::info!("parent and child now share one frame, both downgraded to COW");
}

fn scenario_true_cow_copy() {
    log::info!("--- scenario: true COW copy ---");
    let parent = AddrSpace::new();
    mmap(&parent, 0x60000, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
    handle_page_fault(&parent, 0x60000, true).unwrap();
    let child = parent.fork();
    fork_cow(&parent, &child, 0x60000, 0x60000 + PAGE_SIZE).unwrap();
    handle_page_fault(&parent, 0x60000, true).unwrap();
    log::info!("parent's write fault copied to a fresh frame since the child still shares the old one");
}

fn scenario_concurrent_disjoint_ranges() {
    log::info!("--- scenario: concurrent access to disjoint ranges ---");
    let space = Arc::new(AddrSpace::new());
    mmap(&space, 0x70000, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();
    mmap(&space, 0x80000, PAGE_SIZE, SoftPerm::READ | SoftPerm::WRITE).unwrap();

    let a = {
        let space = space.clone();
        thread::spawn(move || handle_page_fault(&space, 0x70000, true).unwrap())
    };
    let b = {
        let space = space.clone();
        thread::spawn(move || handle_page_fault(&space, 0x80000, true).unwrap())
    };
    assert!(a.join().unwrap());
    assert!(b.join().unwrap());
    log::info!("both threads resolved their faults without contending on a shared lock");

    munmap(&space, 0x70000, PAGE_SIZE).unwrap();
    munmap(&space, 0x80000, PAGE_SIZE).unwrap();
}

fn main() {
    env_logger::init();
    cortenmm::init();
    scenario_lazy_mapping();
    scenario_fork_cow();
    scenario_true_cow_copy();
    scenario_concurrent_disjoint_ranges();
}
