//! Bios and bvec iteration
//!
//! A [`Bio`] describes one I/O as a vector of `(page, len, offset)`
//! segments plus a [`BvecIter`] cursor. The cursor is plain data: callers
//! copy it, advance the copy and leave the bio untouched.

use core::ffi::c_void;
use core::ptr::{self, NonNull};

use kshim_ffi::{sector_t, SECTOR_SHIFT};
use kshim_mm::Page;

use crate::status::BlkStatus;

pub const REQ_OP_BITS: u32 = 8;
pub const REQ_OP_MASK: u32 = (1 << REQ_OP_BITS) - 1;

/// `enum req_op`, the low bits of `bi_opf` and `cmd_flags`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReqOp {
    Read = 0,
    Write = 1,
    Flush = 2,
    Discard = 3,
    SecureErase = 5,
    WriteZeroes = 9,
    ZoneOpen = 10,
    ZoneClose = 11,
    ZoneFinish = 12,
    ZoneAppend = 13,
    ZoneReset = 15,
    ZoneResetAll = 17,
    DrvIn = 34,
    DrvOut = 35,
}

impl ReqOp {
    pub fn from_opf(opf: u32) -> Option<Self> {
        Some(match opf & REQ_OP_MASK {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::Flush,
            3 => Self::Discard,
            5 => Self::SecureErase,
            9 => Self::WriteZeroes,
            10 => Self::ZoneOpen,
            11 => Self::ZoneClose,
            12 => Self::ZoneFinish,
            13 => Self::ZoneAppend,
            15 => Self::ZoneReset,
            17 => Self::ZoneResetAll,
            34 => Self::DrvIn,
            35 => Self::DrvOut,
            _ => return None,
        })
    }

    /// `op_is_write()`: odd opcodes transfer data to the device.
    pub const fn is_write(self) -> bool {
        (self as u8) & 1 != 0
    }
}

/// `struct bio_vec`
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BioVec {
    pub bv_page: *mut Page,
    pub bv_len: u32,
    pub bv_offset: u32,
}

impl BioVec {
    pub const fn new(page: *mut Page, len: u32, offset: u32) -> Self {
        Self {
            bv_page: page,
            bv_len: len,
            bv_offset: offset,
        }
    }
}

/// `struct bvec_iter`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BvecIter {
    /// Device address in 512 byte sectors.
    pub bi_sector: sector_t,
    /// Residual I/O count.
    pub bi_size: u32,
    /// Current index into the bvec array.
    pub bi_idx: u32,
    /// Bytes completed in the current bvec.
    pub bi_bvec_done: u32,
}

/// `bi_end_io` completion callback.
pub type BioEndIo = unsafe extern "C" fn(bio: *mut Bio);

/// `struct bio`
#[repr(C)]
pub struct Bio {
    pub bi_next: *mut Bio,
    pub bi_opf: u32,
    pub bi_status: BlkStatus,
    pub bi_iter: BvecIter,
    pub bi_end_io: Option<BioEndIo>,
    pub bi_private: *mut c_void,
    pub bi_vcnt: u16,
    pub bi_max_vecs: u16,
    pub bi_io_vec: *mut BioVec,
}

// SAFETY: a bio is handed between submitter and completion context; its
// pages are kept alive by whoever built it.
unsafe impl Send for Bio {}

impl Bio {
    /// `bio_alloc()`: an empty bio with room for `nr_vecs` segments.
    pub fn alloc(opf: u32, sector: sector_t, nr_vecs: u16) -> Box<Bio> {
        let vecs: Box<[BioVec]> = vec![BioVec::new(ptr::null_mut(), 0, 0); nr_vecs as usize]
            .into_boxed_slice();
        let bi_io_vec = Box::into_raw(vecs).cast::<BioVec>();
        Box::new(Bio {
            bi_next: ptr::null_mut(),
            bi_opf: opf,
            bi_status: BlkStatus::OK,
            bi_iter: BvecIter {
                bi_sector: sector,
                ..BvecIter::default()
            },
            bi_end_io: None,
            bi_private: ptr::null_mut(),
            bi_vcnt: 0,
            bi_max_vecs: nr_vecs,
            bi_io_vec,
        })
    }

    /// `bio_op()`
    pub fn op(&self) -> Option<ReqOp> {
        ReqOp::from_opf(self.bi_opf)
    }

    /// Filled segments.
    pub fn io_vec(&self) -> &[BioVec] {
        if self.bi_io_vec.is_null() {
            return &[];
        }
        // SAFETY: `bi_io_vec` holds `bi_max_vecs` entries and `bi_vcnt` never
        // exceeds it.
        unsafe { core::slice::from_raw_parts(self.bi_io_vec, self.bi_vcnt as usize) }
    }

    /// `bio_add_page()`: append a segment. Returns the bytes added, `0` when
    /// the vector is full. The bio does not take a page reference.
    pub fn add_page(&mut self, page: NonNull<Page>, len: u32, offset: u32) -> u32 {
        if self.bi_vcnt >= self.bi_max_vecs || len == 0 {
            return 0;
        }
        // SAFETY: `bi_vcnt < bi_max_vecs`, in bounds of the allocation.
        unsafe {
            *self.bi_io_vec.add(self.bi_vcnt as usize) = BioVec::new(page.as_ptr(), len, offset);
        }
        self.bi_vcnt += 1;
        self.bi_iter.bi_size += len;
        len
    }

    /// `bio_sectors()`
    pub fn sectors(&self) -> u32 {
        self.bi_iter.bi_size >> SECTOR_SHIFT
    }

    /// `bio_for_each_segment`: the remaining segments, without moving
    /// `bi_iter`.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            bio: self,
            iter: self.bi_iter,
        }
    }

    /// `bio_advance()`: consume `bytes` from the front of the bio.
    pub fn advance(&mut self, bytes: u32) {
        if bio_no_advance_iter(self) {
            self.bi_iter.bi_size = self.bi_iter.bi_size.saturating_sub(bytes);
            self.bi_iter.bi_sector += (bytes >> SECTOR_SHIFT) as sector_t;
            return;
        }
        let vecs = self.bi_io_vec;
        let mut iter = self.bi_iter;
        iter.bi_sector += (bytes >> SECTOR_SHIFT) as sector_t;
        // SAFETY: `vecs` covers every segment `bi_iter` can reach.
        unsafe { bvec_iter_advance(vecs, &mut iter, bytes) };
        self.bi_iter = iter;
    }
}

impl Drop for Bio {
    fn drop(&mut self) {
        if self.bi_io_vec.is_null() {
            return;
        }
        let slice = ptr::slice_from_raw_parts_mut(self.bi_io_vec, self.bi_max_vecs as usize);
        // SAFETY: allocated as a boxed slice of `bi_max_vecs` in `alloc`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// `bio_endio()`: record `status` and run the completion callback.
pub fn bio_endio(bio: &mut Bio, status: BlkStatus) {
    bio.bi_status = status;
    if let Some(end_io) = bio.bi_end_io {
        tracing::trace!(sector = bio.bi_iter.bi_sector, status = ?status, "bio completed");
        // SAFETY: the callback was installed by the bio's owner for this bio.
        unsafe { end_io(bio) };
    }
}

/// `bio_no_advance_iter()`: operations whose payload is not a data buffer.
pub fn bio_no_advance_iter(bio: &Bio) -> bool {
    matches!(
        bio.op(),
        Some(ReqOp::Discard | ReqOp::SecureErase | ReqOp::WriteZeroes)
    )
}

/// `bvec_iter_bvec()`: the segment under the cursor, trimmed to what
/// remains of both the bvec and the iteration.
///
/// # Safety
/// `bv` must point to at least `iter.bi_idx + 1` entries and `bi_size` must
/// be non-zero.
pub unsafe fn bvec_iter_bvec(bv: *const BioVec, iter: &BvecIter) -> BioVec {
    let cur = &*bv.add(iter.bi_idx as usize);
    BioVec {
        bv_page: cur.bv_page,
        bv_len: iter.bi_size.min(cur.bv_len - iter.bi_bvec_done),
        bv_offset: cur.bv_offset + iter.bi_bvec_done,
    }
}

/// `bvec_iter_advance()`: move the cursor forward `bytes`. Asking for more
/// than remains warns, empties the cursor and returns `false`.
///
/// # Safety
/// `bv` must cover every segment the advance walks across.
pub unsafe fn bvec_iter_advance(bv: *const BioVec, iter: &mut BvecIter, bytes: u32) -> bool {
    if bytes > iter.bi_size {
        tracing::warn!(bytes, remaining = iter.bi_size, "attempted to advance past end of bvec iter");
        iter.bi_size = 0;
        return false;
    }
    iter.bi_size -= bytes;
    let mut bytes = bytes + iter.bi_bvec_done;
    let mut idx = iter.bi_idx;
    while bytes > 0 {
        let len = (*bv.add(idx as usize)).bv_len;
        if bytes < len {
            break;
        }
        bytes -= len;
        idx += 1;
    }
    iter.bi_idx = idx;
    iter.bi_bvec_done = bytes;
    true
}

/// `bvec_iter_advance_single()`: advance within the current segment, at
/// most to its end.
///
/// # Safety
/// `bv` must point to at least `iter.bi_idx + 1` entries.
pub unsafe fn bvec_iter_advance_single(bv: *const BioVec, iter: &mut BvecIter, bytes: u32) {
    let mut done = iter.bi_bvec_done + bytes;
    if done == (*bv.add(iter.bi_idx as usize)).bv_len {
        done = 0;
        iter.bi_idx += 1;
    }
    iter.bi_bvec_done = done;
    iter.bi_size -= bytes;
}

/// `bio_advance_iter_single()`: advance `iter`, a cursor over `bio`, by
/// `bytes` that do not cross the current segment.
pub fn bio_advance_iter_single(bio: &Bio, iter: &mut BvecIter, bytes: u32) {
    kshim_core::bug_on!(
        bytes > iter.bi_size,
        "bio_advance_iter_single: {} bytes past the {} remaining",
        bytes,
        iter.bi_size
    );
    iter.bi_sector += (bytes >> SECTOR_SHIFT) as sector_t;
    if bio_no_advance_iter(bio) {
        iter.bi_size -= bytes;
    } else {
        // SAFETY: `bi_size` still covers `bytes`, so the cursor is inside
        // the vector, which a clone shares with its parent.
        unsafe { bvec_iter_advance_single(bio.bi_io_vec, iter, bytes) };
    }
}

/// Iterator over the remaining segments of a bio, see [`Bio::segments`].
pub struct Segments<'a> {
    bio: &'a Bio,
    iter: BvecIter,
}

impl Segments<'_> {
    /// Cursor at the next segment.
    pub fn iter(&self) -> BvecIter {
        self.iter
    }
}

impl Iterator for Segments<'_> {
    type Item = BioVec;

    fn next(&mut self) -> Option<BioVec> {
        if self.iter.bi_size == 0 {
            return None;
        }
        // SAFETY: bytes remain, so `bi_idx` names a live segment.
        let bv = unsafe { bvec_iter_bvec(self.bio.bi_io_vec, &self.iter) };
        bio_advance_iter_single(self.bio, &mut self.iter, bv.bv_len);
        Some(bv)
    }
}

impl core::iter::FusedIterator for Segments<'_> {}
