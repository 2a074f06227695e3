//! Hardware page-table entry representation (component C2).
//!
//! [`HardwarePte`] models the subset of a real PTE's bits this simulator
//! cares about: the present bit, the target frame number, and the
//! permission/accessed/dirty bits a hardware walker would consult. It has
//! no notion of software-only state (that lives in [`crate::metadata`]) and
//! performs no locking of its own; it is always manipulated under the
//! owning page-table page's descriptor lock.

use crate::frame::FrameNumber;

/// A single simulated hardware page-table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwarePte {
    /// Target frame, if the entry is present.
    frame: Option<FrameNumber>,
    present: bool,
    writable: bool,
    user: bool,
    accessed: bool,
    dirty: bool,
}

impl HardwarePte {
    /// An empty, not-present entry.
    pub const fn empty() -> Self {
        Self {
            frame: None,
            present: false,
            writable: false,
            user: false,
            accessed: false,
            dirty: false,
        }
    }

    /// Builds a present entry pointing at `frame` with the given permission bits.
    pub fn present(frame: FrameNumber, writable: bool, user: bool) -> Self {
        Self {
            frame: Some(frame),
            present: true,
            writable,
            user,
            accessed: false,
            dirty: false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_user(&self) -> bool {
        self.user
    }

    pub fn accessed(&self) -> bool {
        self.accessed
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_accessed(&mut self, value: bool) {
        self.accessed = value;
    }

    pub fn set_dirty(&mut self, value: bool) {
        self.dirty = value;
    }

    /// Flips the writable bit without otherwise disturbing the entry.
    ///
    /// Used by COW resolution: a single-owner COW page is made writable in
    /// place rather than copied.
    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    /// Clears the entry back to not-present, dropping its frame reference.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// True iff the entry is both present and actually points at a frame.
    /// An absent entry, even one that still carries a stale frame number, is
    /// never valid.
    pub fn is_valid(&self) -> bool {
        self.present && self.frame.is_some()
    }
}
