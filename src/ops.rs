//! Mapping operations (component C9): `mmap`, `munmap`, page-fault
//! handling, and fork's copy-on-write setup.
//!
//! Everything here is built entirely out of [`crate::addrspace::AddrSpace`]
//! and [`crate::cursor::Cursor`] calls; nothing in this module touches a
//! descriptor's lock directly.

use crate::addr::{self, page_align_down, page_align_up, pte_index, VirtAddr, PAGE_SIZE};
use crate::addrspace::AddrSpace;
use crate::error::Result;
use crate::frame::FrameNumber;
use crate::metadata::{EntryMetadata, SoftPerm, Status};
use crate::pte::HardwarePte;

/// Runs `op` once per leaf-page-table-page-sized chunk of `[start, end)`,
/// acquiring a fresh scoped cursor for each chunk so no single call holds
/// more than one leaf page's lock at a time.
fn for_each_leaf_chunk(
    space: &AddrSpace,
    start: VirtAddr,
    end: VirtAddr,
    mut op: impl FnMut(&mut crate::cursor::Cursor, VirtAddr, VirtAddr) -> Result<()>,
) -> Result<()> {
    let span = space.leaf_span();
    let mut cursor_start = start;
    while cursor_start < end {
        let chunk_boundary = page_align_down(cursor_start) / span * span + span;
        let cursor_end = chunk_boundary.min(end);
        let mut cursor = space.scoped_lock(cursor_start, cursor_end.max(cursor_start + 1), false)?;
        op(&mut cursor, cursor_start, cursor_end)?;
        cursor_start = cursor_end;
    }
    Ok(())
}

/// Creates a lazy, private anonymous mapping covering `[addr, addr + length)`.
///
/// No frame is allocated yet: every page in the range is installed with
/// [`Status::PrivateAnon`] and an absent PTE. The first access to each page
/// allocates its frame via [`handle_page_fault`].
pub fn mmap(space: &AddrSpace, addr: VirtAddr, length: usize, perm: SoftPerm) -> Result<()> {
    let start = page_align_down(addr);
    let end = page_align_up(addr + length);
    addr::check_in_range(end.saturating_sub(1), space.levels())?;

    for_each_leaf_chunk(space, start, end, |cursor, chunk_start, chunk_end| {
        let mut page = chunk_start;
        while page < chunk_end {
            cursor.map(
                page,
                HardwarePte::empty(),
                EntryMetadata {
                    status: Status::PrivateAnon,
                    soft_perm: perm,
                    refcount: 1,
                    file_offset: None,
                    frame: None,
                },
            )?;
            page += PAGE_SIZE;
        }
        Ok(())
    })
}

/// Tears down every mapping in `[addr, addr + length)`, dropping the
/// refcount on every frame that was mapped and detaching any
/// intermediate page-table page left fully empty.
pub fn munmap(space: &AddrSpace, addr: VirtAddr, length: usize) -> Result<()> {
    let start = page_align_down(addr);
    let end = page_align_up(addr + length);

    for_each_leaf_chunk(space, start, end, |cursor, chunk_start, chunk_end| {
        let freed = cursor.unmap_range(chunk_start, chunk_end)?;
        for frame in freed {
            space.frames().dec_ref(frame);
        }
        Ok(())
    })?;

    // Best-effort: if a leaf page-table page just cleared ended up fully
    // empty, hand it to the reclaimer. Only attempted for leaf pages wholly
    // contained in the unmapped range, so a partially-unmapped leaf page
    // (still backing mappings outside this call's range) is left alone.
    let mut chunk_start = start;
    let span = space.leaf_span();
    while chunk_start < end {
        let chunk_boundary = page_align_down(chunk_start) / span * span + span;
        if chunk_boundary <= end {
            let cursor = space.scoped_lock(chunk_start, chunk_start + 1, false)?;
            let empty = cursor.is_leaf_empty();
            drop(cursor);
            if empty {
                let _ = space.remove_page_table(chunk_start);
            }
        }
        chunk_start = chunk_boundary;
    }
    Ok(())
}

/// Handles a page fault at `addr`. Returns `Ok(true)` if the access is now
/// satisfied, `Ok(false)` if it is a genuine segmentation fault (no mapping,
/// or a write to a read-only mapping).
pub fn handle_page_fault(space: &AddrSpace, addr: VirtAddr, is_write: bool) -> Result<bool> {
    let page = page_align_down(addr);
    let mut cursor = space.scoped_lock(page, page + 1, false)?;
    let (pte, mut meta) = cursor.query(page)?;

    match meta.status {
        Status::Invalid => {
            log::debug!("handle_page_fault: {page:#x} has no mapping, segfault");
            Ok(false)
        }

        Status::PrivateAnon if pte.frame().is_none() => {
            let frame = space.frames().alloc();
            let writable = meta.soft_perm.contains(SoftPerm::WRITE);
            meta.status = Status::Mapped;
            meta.frame = Some(frame);
            log::debug!("handle_page_fault: lazily backing {page:#x} with frame {frame:?}");
            cursor.map(page, HardwarePte::present(frame, writable, true), meta)?;
            Ok(true)
        }

        Status::COW if is_write => resolve_cow(space, &mut cursor, page, pte, meta),

        Status::Mapped | Status::FileMapped | Status::PrivateAnon => {
            if is_write && !pte.is_writable() {
                Ok(false)
            } else {
                Ok(true)
            }
        }

        Status::COW if !pte.is_present() => {
            log::debug!("handle_page_fault: {page:#x} is COW with no present PTE on a read, segfault");
            Ok(false)
        }

        Status::COW => Ok(true),
    }
}

/// Resolves a copy-on-write fault at an already-locked `page`.
///
/// If the frame is still shared (refcount > 1), a fresh frame is allocated
/// and the mapping is switched to point at it (a "true" copy, modeled here
/// as a refcount transfer since no page contents are simulated). If this
/// mapping was the last owner, the PTE is simply flipped writable in place
/// — no copy needed.
fn resolve_cow(
    space: &AddrSpace,
    cursor: &mut crate::cursor::Cursor,
    page: VirtAddr,
    mut pte: HardwarePte,
    mut meta: EntryMetadata,
) -> Result<bool> {
    let frame = match pte.frame() {
        Some(frame) => frame,
        None => return Ok(false),
    };

    if space.frames().refcount(frame) > 1 {
        let new_frame = space.frames().alloc();
        space.frames().dec_ref(frame);
        meta.status = Status::PrivateAnon;
        meta.frame = Some(new_frame);
        meta.refcount = 1;
        log::debug!("resolve_cow: {page:#x} still shared, copying frame {frame:?} -> {new_frame:?}");
        cursor.map(page, HardwarePte::present(new_frame, true, true), meta)?;
    } else {
        pte.set_writable(true);
        meta.status = Status::PrivateAnon;
        meta.refcount = 1;
        log::debug!("resolve_cow: {page:#x} solely owns frame {frame:?}, resolving in place");
        cursor.map(page, pte, meta)?;
    }
    Ok(true)
}

/// Downgrades every `Mapped` entry in `[start, end)` of `parent` to `COW`,
/// mirroring the same (now-shared) frame into `child` at the same
/// addresses, also as `COW`. Both mappings' refcounts on the shared frame
/// are bumped to reflect the new sharing; a subsequent write fault on
/// either side resolves independently via [`handle_page_fault`].
pub fn fork_cow(parent: &AddrSpace, child: &AddrSpace, start: VirtAddr, end: VirtAddr) -> Result<()> {
    let start = page_align_down(start);
    let end = page_align_up(end);
    let span = parent.leaf_span();

    let mut chunk_start = start;
    while chunk_start < end {
        let chunk_boundary = page_align_down(chunk_start) / span * span + span;
        let chunk_end = chunk_boundary.min(end);

        let mut parent_cursor = parent.scoped_lock(chunk_start, chunk_start + 1, false)?;
        let mut child_cursor = child.scoped_lock(chunk_start, chunk_start + 1, false)?;

        let mut page = chunk_start;
        while page < chunk_end {
            let (pte, meta) = parent_cursor.query(page)?;
            if meta.status == Status::Mapped {
                if let Some(frame) = pte.frame() {
                    parent.frames().inc_ref(frame);

                    let mut downgraded_pte = pte;
                    downgraded_pte.set_writable(false);
                    let mut downgraded_meta = meta.clone();
                    downgraded_meta.status = Status::COW;
                    // Each sharing entry's `refcount` is its own one-share
                    // stake in the frame, not the frame's global refcount:
                    // invariant I5 requires the entries' refcounts to *sum*
                    // to the global count, not each mirror it.
                    downgraded_meta.refcount = 1;

                    parent_cursor.map(page, downgraded_pte, downgraded_meta.clone())?;
                    child_cursor.map(page, downgraded_pte, downgraded_meta)?;
                }
            }
            page += PAGE_SIZE;
        }
        chunk_start = chunk_boundary;
    }
    Ok(())
}

/// Convenience for the one-level index used above; kept private since
/// external callers always go through [`mmap`]/[`munmap`]/[`handle_page_fault`].
#[allow(dead_code)]
fn leaf_index(addr: VirtAddr) -> usize {
    pte_index(addr, 0)
}
