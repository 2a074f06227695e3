//! Error types returned by the public API.
//!
//! `MmError` covers the three error kinds the design calls fatal-or-caller-visible:
//! an out-of-range address, a lock that could not be acquired within the retry
//! budget, and a protocol violation (an invariant the implementation itself is
//! supposed to guarantee was observed broken). Segmentation faults are *not*
//! represented here: [`crate::ops::handle_page_fault`] reports them as a plain
//! `bool`, matching the design's treatment of them as an expected outcome of a
//! page fault rather than an implementation error.

use thiserror::Error;

use crate::addr::VirtAddr;

/// The error type shared by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum MmError {
    /// A virtual address (or range) fell outside `[0, max_addr)` for the
    /// address space's configured number of page-table levels.
    #[error("address {0:#x} is out of range for this address space")]
    AddressOutOfRange(VirtAddr),

    /// A scoped lock could not be acquired after exhausting the retry budget.
    ///
    /// This surfaces lock-and-validate contention that did not resolve in
    /// time; callers may retry the whole operation.
    #[error("failed to acquire a consistent lock on the target range after retrying")]
    LockAcquisitionFailed,

    /// An internal invariant was observed violated.
    ///
    /// Reaching this variant (as opposed to a panic) means the violation was
    /// detected at a boundary where it could still be reported as an error
    /// rather than aborting the process, e.g. releasing a cursor twice.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

/// The `Result` alias used throughout this crate.
pub type Result<T> = core::result::Result<T, MmError>;
