//! Physical frame allocation (component C5).
//!
//! The design's non-goals exclude real physical memory management; this
//! allocator is a monotonic counter behind a mutex, handing out frame
//! numbers that are never reused within a process's lifetime. It also owns
//! the COW refcount map (`frame -> refcount`) that [`crate::ops`] consults
//! when deciding whether a COW fault must copy or can resolve in place.

use std::collections::HashMap;
use std::sync::Mutex;

/// A simulated physical frame number. Opaque beyond equality/ordering; the
/// crate never dereferences it as an actual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Default starting frame number, chosen to keep frame numbers visually
/// distinct from vaddr-derived indices in logs.
pub const DEFAULT_BASE_FRAME: u64 = 0x1000;

struct Inner {
    next: u64,
    /// Reference counts for frames currently shared by COW mappings.
    /// A frame with no entry here (or a count of 1) has a single owner.
    refcounts: HashMap<FrameNumber, u32>,
}

/// Allocates fresh frame numbers and tracks COW sharing refcounts.
///
/// All mutation goes through a single mutex, consistent with the design's
/// lock-ordering rule that the frame-allocator mutex is always the last one
/// taken in any lock chain.
pub struct FrameAllocator {
    inner: Mutex<Inner>,
}

impl FrameAllocator {
    /// Creates an allocator starting at [`DEFAULT_BASE_FRAME`].
    pub fn new() -> Self {
        Self::with_base(DEFAULT_BASE_FRAME)
    }

    pub fn with_base(base: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: base,
                refcounts: HashMap::new(),
            }),
        }
    }

    /// Allocates a fresh frame with an implicit refcount of 1.
    pub fn alloc(&self) -> FrameNumber {
        let mut inner = self.inner.lock().unwrap();
        let frame = FrameNumber(inner.next);
        inner.next += 1;
        frame
    }

    /// Returns the current refcount for `frame` (1 if untracked, meaning
    /// sole ownership).
    pub fn refcount(&self, frame: FrameNumber) -> u32 {
        let inner = self.inner.lock().unwrap();
        *inner.refcounts.get(&frame).unwrap_or(&1)
    }

    /// Increments `frame`'s refcount, e.g. when fork-COW adds a second
    /// entry sharing it. Returns the refcount after incrementing.
    pub fn inc_ref(&self, frame: FrameNumber) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.refcounts.entry(frame).or_insert(1);
        *count += 1;
        *count
    }

    /// Decrements `frame`'s refcount, e.g. when an entry sharing it is
    /// unmapped or resolved via copy. Returns the refcount after
    /// decrementing; a frame that drops to 0 is removed from tracking (the
    /// caller is responsible for reclaiming it).
    pub fn dec_ref(&self, frame: FrameNumber) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        match inner.refcounts.get_mut(&frame) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                inner.refcounts.remove(&frame);
                0
            }
            None => 0,
        }
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_monotonic_and_unique() {
        let allocator = FrameAllocator::new();
        let a = allocator.alloc();
        let b = allocator.alloc();
        assert_ne!(a, b);
        assert_eq!(a.value() + 1, b.value());
    }

    #[test]
    fn untracked_frame_has_refcount_one() {
        let allocator = FrameAllocator::new();
        let frame = allocator.alloc();
        assert_eq!(allocator.refcount(frame), 1);
    }

    #[test]
    fn inc_and_dec_ref_track_sharing() {
        let allocator = FrameAllocator::new();
        let frame = allocator.alloc();
        assert_eq!(allocator.inc_ref(frame), 2);
        assert_eq!(allocator.refcount(frame), 2);
        assert_eq!(allocator.dec_ref(frame), 1);
        assert_eq!(allocator.dec_ref(frame), 0);
        // Once fully decremented, the frame is untracked again.
        assert_eq!(allocator.refcount(frame), 1);
    }
}
