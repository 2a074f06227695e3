//! Per-entry software metadata (component C3).
//!
//! Every slot in a page-table page carries, alongside its [`HardwarePte`],
//! an [`EntryMetadata`] describing state no hardware walker would need: the
//! software-only [`Status`] state machine, the requested (not necessarily
//! currently-enforced) [`SoftPerm`] permission bits, the COW refcount, and
//! an optional file offset for file-backed mappings.

use bitflags::bitflags;

use crate::frame::FrameNumber;

bitflags! {
    /// Software-requested permission bits for a mapping.
    ///
    /// These describe what the mapping was requested to allow, independent
    /// of how [`crate::pte::HardwarePte`] currently enforces it (e.g. a COW
    /// page requests `WRITE` but its PTE is read-only until resolved).
    #[derive(Default)]
    pub struct SoftPerm: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// The software state machine for a page-table entry.
///
/// See the design's state-transition table: `mmap` creates `PrivateAnon`
/// (lazily, with no frame yet) or `FileMapped`; a page fault on a
/// `PrivateAnon` entry with no frame allocates one and moves to `Mapped`;
/// fork downgrades `Mapped` to `COW`; COW resolution moves `COW` to
/// `PrivateAnon`; `munmap` moves any of these back to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// No mapping occupies this slot.
    #[default]
    Invalid,
    /// A private anonymous mapping requested but not yet backed by a frame.
    PrivateAnon,
    /// A private anonymous mapping backed by a frame, exclusively owned.
    Mapped,
    /// A copy-on-write mapping; the frame may be shared with other entries.
    COW,
    /// A file-backed mapping.
    FileMapped,
}

impl Status {
    /// True for any status other than [`Status::Invalid`].
    pub fn is_mapped(&self) -> bool {
        !matches!(self, Status::Invalid)
    }
}

/// Software metadata attached to one page-table entry slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    pub status: Status,
    pub soft_perm: SoftPerm,
    /// Number of entries sharing the underlying frame (COW reference count).
    pub refcount: u32,
    /// Offset into the backing file, for [`Status::FileMapped`] entries.
    pub file_offset: Option<u64>,
    /// The frame this metadata currently describes, if any. Kept alongside
    /// the PTE's own frame field so invariants can be checked even across
    /// the brief window where a PTE has been cleared but metadata has not.
    pub frame: Option<FrameNumber>,
}

impl EntryMetadata {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_invalid(&self) -> bool {
        self.status == Status::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_invalid() {
        let meta = EntryMetadata::default();
        assert!(meta.is_invalid());
        assert_eq!(meta.refcount, 0);
    }

    #[test]
    fn soft_perm_bits_compose() {
        let perm = SoftPerm::READ | SoftPerm::WRITE;
        assert!(perm.contains(SoftPerm::READ));
        assert!(perm.contains(SoftPerm::WRITE));
        assert!(!perm.contains(SoftPerm::EXEC));
    }

    #[test]
    fn is_mapped_excludes_only_invalid() {
        assert!(!Status::Invalid.is_mapped());
        assert!(Status::Mapped.is_mapped());
        assert!(Status::COW.is_mapped());
        assert!(Status::PrivateAnon.is_mapped());
        assert!(Status::FileMapped.is_mapped());
    }
}
