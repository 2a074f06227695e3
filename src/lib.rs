//! `cortenmm` simulates a virtual-memory manager that, unlike a
//! conventional kernel, keeps no separate VMA/region tree: every page-table
//! page carries its own software bookkeeping directly alongside its
//! hardware entries, and mutation is only ever reachable through a scoped
//! [`cursor::Cursor`] obtained from an [`addrspace::AddrSpace`]. The point
//! of the exercise is the concurrency protocol this makes possible —
//! lock-free descent, lock-and-validate, optional DFS subtree locking, and
//! RCU-style deferred reclamation — in place of a single address-space-wide
//! lock.
//!
//! This crate does not allocate or touch real physical memory: frames are
//! opaque, monotonically increasing numbers handed out by
//! [`frame::FrameAllocator`], and nothing here models TLBs, swap, NUMA, or
//! protection keys. See each module's docs for the component of the design
//! it implements.

pub mod addr;
pub mod addrspace;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod node;
pub mod ops;
pub mod pte;
pub mod reclaim;
mod sync;

pub use addr::VirtAddr;
pub use addrspace::AddrSpace;
pub use cursor::Cursor;
pub use error::{MmError, Result};
pub use frame::FrameNumber;
pub use metadata::{EntryMetadata, SoftPerm, Status};
pub use pte::HardwarePte;

/// Emits a trace-level log line confirming the crate loaded.
///
/// This crate never calls into `log` macros unless a subscriber has been
/// installed by the embedding application (see `demos/cortenmm_demo.rs` for
/// an example using `env_logger`); calling this is optional and only
/// affects whether those log calls end up anywhere.
pub fn init() {
    log::trace!("cortenmm initialized; install a `log` subscriber to see further output");
}
