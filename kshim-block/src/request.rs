//! Block requests and their driver private data
//!
//! Every request a [`TagSet`] hands out is followed in the same allocation
//! by `cmd_size` bytes of driver PDU, so `blk_mq_rq_to_pdu` and
//! `blk_mq_rq_from_pdu` are plain pointer arithmetic.

use core::alloc::Layout;
use core::ffi::c_void;
use core::mem::{align_of, size_of};
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use kshim_core::context;
use kshim_ffi::{c_int, sector_t, KernelError, KernelResult, SECTOR_SHIFT};
use parking_lot::{Condvar, Mutex};

use crate::bio::{bio_endio, Bio, ReqOp};
use crate::status::BlkStatus;

pub const BLK_MQ_MAX_DEPTH: u32 = 10240;

bitflags! {
    /// `blk_mq_req_flags_t`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlkMqReqFlags: u32 {
        /// Fail with `EAGAIN` instead of waiting for a free tag.
        const NOWAIT = 1 << 0;
    }
}

/// `enum mq_rq_state`
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MqRqState {
    Idle = 0,
    InFlight = 1,
    Complete = 2,
}

/// `struct request`
#[repr(C)]
pub struct Request {
    pub tag: c_int,
    pub cmd_flags: u32,
    state: AtomicU32,
    /// `__sector`
    pub sector: sector_t,
    /// `__data_len`
    pub data_len: u32,
    pub bio: *mut Bio,
    pub biotail: *mut Bio,
    pub end_io_data: *mut c_void,
}

impl Request {
    fn reset(&mut self, op: ReqOp) {
        self.cmd_flags = op as u32;
        self.state.store(MqRqState::Idle as u32, Ordering::Relaxed);
        self.sector = 0;
        self.data_len = 0;
        self.bio = ptr::null_mut();
        self.biotail = ptr::null_mut();
        self.end_io_data = ptr::null_mut();
    }

    /// `req_op()`
    pub fn op(&self) -> Option<ReqOp> {
        ReqOp::from_opf(self.cmd_flags)
    }

    /// `blk_rq_pos()`
    pub fn pos(&self) -> sector_t {
        self.sector
    }

    /// `blk_rq_bytes()`
    pub fn bytes(&self) -> u32 {
        self.data_len
    }

    /// `blk_rq_sectors()`
    pub fn sectors(&self) -> u32 {
        self.data_len >> SECTOR_SHIFT
    }

    /// `blk_mq_rq_state()`
    pub fn state(&self) -> MqRqState {
        match self.state.load(Ordering::Acquire) {
            0 => MqRqState::Idle,
            1 => MqRqState::InFlight,
            _ => MqRqState::Complete,
        }
    }

    /// `blk_rq_append_bio()`: chain `bio` at the tail. The first bio sets
    /// the start sector.
    ///
    /// # Safety
    /// `bio` must stay valid until the request is ended.
    pub unsafe fn append_bio(&mut self, bio: NonNull<Bio>) {
        let b = &mut *bio.as_ptr();
        b.bi_next = ptr::null_mut();
        if self.bio.is_null() {
            self.bio = bio.as_ptr();
            self.sector = b.bi_iter.bi_sector;
        } else {
            (*self.biotail).bi_next = bio.as_ptr();
        }
        self.biotail = bio.as_ptr();
        self.data_len += b.bi_iter.bi_size;
    }

    /// `blk_mq_start_request()`
    pub fn start(&self) {
        let prev = self.state.swap(MqRqState::InFlight as u32, Ordering::AcqRel);
        kshim_core::bug_on!(
            prev != MqRqState::Idle as u32,
            "blk_mq_start_request: tag {} not idle",
            self.tag
        );
        tracing::trace!(tag = self.tag, sector = self.sector, bytes = self.data_len, "request started");
    }

    /// `blk_mq_end_request()`: complete every bio with `status`.
    pub fn end(&mut self, status: BlkStatus) {
        let prev = self.state.swap(MqRqState::Complete as u32, Ordering::AcqRel);
        kshim_core::bug_on!(
            prev != MqRqState::InFlight as u32,
            "blk_mq_end_request: tag {} not in flight",
            self.tag
        );
        let mut bio = self.bio;
        while !bio.is_null() {
            // SAFETY: appended bios stay valid until the request ends.
            let b = unsafe { &mut *bio };
            let next = b.bi_next;
            b.bi_next = ptr::null_mut();
            bio_endio(b, status);
            bio = next;
        }
        self.bio = ptr::null_mut();
        self.biotail = ptr::null_mut();
    }
}

/// `blk_mq_rq_to_pdu()`: the driver data right after `rq`.
pub fn blk_mq_rq_to_pdu(rq: *mut Request) -> *mut c_void {
    rq.wrapping_add(1).cast()
}

/// `blk_mq_rq_from_pdu()`: inverse of [`blk_mq_rq_to_pdu`].
pub fn blk_mq_rq_from_pdu(pdu: *mut c_void) -> *mut Request {
    pdu.cast::<Request>().wrapping_sub(1)
}

/// `struct blk_mq_tag_set` with its static request pool.
pub struct TagSet {
    queue_depth: u32,
    cmd_size: usize,
    stride: usize,
    base: NonNull<u8>,
    layout: Layout,
    free: Mutex<Vec<u32>>,
    tag_freed: Condvar,
}

// SAFETY: requests are handed out one owner at a time through the free list.
unsafe impl Send for TagSet {}
unsafe impl Sync for TagSet {}

impl TagSet {
    /// `blk_mq_alloc_tag_set()`: `queue_depth` requests, each followed by
    /// `cmd_size` zeroed PDU bytes.
    pub fn new(queue_depth: u32, cmd_size: usize) -> KernelResult<Self> {
        if queue_depth == 0 || queue_depth > BLK_MQ_MAX_DEPTH {
            return Err(KernelError::EINVAL);
        }
        let align = align_of::<Request>();
        let stride = size_of::<Request>()
            .checked_add(cmd_size)
            .and_then(|n| n.checked_add(align - 1))
            .ok_or(KernelError::ENOMEM)?
            / align
            * align;
        let total = stride
            .checked_mul(queue_depth as usize)
            .ok_or(KernelError::ENOMEM)?;
        let layout = Layout::from_size_align(total, align)?;
        // SAFETY: `total` is at least one request.
        let base = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
            .ok_or(KernelError::ENOMEM)?;
        for tag in 0..queue_depth {
            let rq = base.as_ptr().wrapping_add(tag as usize * stride).cast::<Request>();
            // SAFETY: in bounds, aligned to `Request`.
            unsafe {
                ptr::write(
                    rq,
                    Request {
                        tag: tag as c_int,
                        cmd_flags: 0,
                        state: AtomicU32::new(MqRqState::Idle as u32),
                        sector: 0,
                        data_len: 0,
                        bio: ptr::null_mut(),
                        biotail: ptr::null_mut(),
                        end_io_data: ptr::null_mut(),
                    },
                )
            };
        }
        tracing::debug!(queue_depth, cmd_size, stride, "tag set allocated");
        Ok(Self {
            queue_depth,
            cmd_size,
            stride,
            base,
            layout,
            free: Mutex::new((0..queue_depth).rev().collect()),
            tag_freed: Condvar::new(),
        })
    }

    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }

    pub fn cmd_size(&self) -> usize {
        self.cmd_size
    }

    /// Requests not currently handed out.
    pub fn nr_free(&self) -> usize {
        self.free.lock().len()
    }

    /// `blk_mq_tag_to_rq()`
    pub fn tag_to_rq(&self, tag: u32) -> Option<NonNull<Request>> {
        if tag >= self.queue_depth {
            return None;
        }
        NonNull::new(
            self.base
                .as_ptr()
                .wrapping_add(tag as usize * self.stride)
                .cast(),
        )
    }

    /// `blk_mq_alloc_request()`. Waits for a free tag unless `NOWAIT` is
    /// given, in which case an exhausted set fails with `EAGAIN`.
    pub fn alloc_request(&self, op: ReqOp, flags: BlkMqReqFlags) -> KernelResult<RequestRef<'_>> {
        let nowait = flags.contains(BlkMqReqFlags::NOWAIT);
        if !nowait {
            context::might_sleep("blk_mq_alloc_request");
        }
        let tag = {
            let mut free = self.free.lock();
            if nowait {
                free.pop().ok_or(KernelError::EAGAIN)?
            } else {
                loop {
                    if let Some(tag) = free.pop() {
                        break tag;
                    }
                    self.tag_freed.wait(&mut free);
                }
            }
        };
        let rq = self.tag_to_rq(tag).ok_or(KernelError::EINVAL)?;
        // SAFETY: the tag was free, nobody else holds this request.
        unsafe { (*rq.as_ptr()).reset(op) };
        Ok(RequestRef { rq, set: self })
    }

    fn release(&self, tag: u32) {
        let mut free = self.free.lock();
        free.push(tag);
        self.tag_freed.notify_one();
    }
}

impl Drop for TagSet {
    fn drop(&mut self) {
        // SAFETY: every `RequestRef` borrows the set, none is left.
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// An allocated request, returned to its tag set on drop
/// (`blk_mq_free_request`).
pub struct RequestRef<'a> {
    rq: NonNull<Request>,
    set: &'a TagSet,
}

// SAFETY: exclusive owner of the request; completion may run anywhere.
unsafe impl Send for RequestRef<'_> {}

impl RequestRef<'_> {
    pub fn as_ptr(&self) -> *mut Request {
        self.rq.as_ptr()
    }

    /// Untyped PDU address.
    pub fn pdu_ptr(&self) -> NonNull<c_void> {
        // SAFETY: offset of a non-null request inside the pool.
        unsafe { NonNull::new_unchecked(blk_mq_rq_to_pdu(self.rq.as_ptr())) }
    }

    fn check_pdu<T>(&self) {
        if size_of::<T>() > self.set.cmd_size || align_of::<T>() > align_of::<Request>() {
            kshim_core::bug!(
                "pdu of {} bytes (align {}) does not fit cmd_size {}",
                size_of::<T>(),
                align_of::<T>(),
                self.set.cmd_size
            );
        }
    }

    /// The PDU as a `T`. Zeroed bytes must be a valid `T` until the driver
    /// first writes one.
    pub fn pdu<T>(&self) -> &T {
        self.check_pdu::<T>();
        // SAFETY: size and alignment checked, exclusive to this request.
        unsafe { self.pdu_ptr().cast::<T>().as_ref() }
    }

    pub fn pdu_mut<T>(&mut self) -> &mut T {
        self.check_pdu::<T>();
        // SAFETY: as above, `&mut self` is the only accessor.
        unsafe { self.pdu_ptr().cast::<T>().as_mut() }
    }
}

impl Deref for RequestRef<'_> {
    type Target = Request;

    fn deref(&self) -> &Request {
        // SAFETY: owned until drop.
        unsafe { self.rq.as_ref() }
    }
}

impl DerefMut for RequestRef<'_> {
    fn deref_mut(&mut self) -> &mut Request {
        // SAFETY: owned until drop.
        unsafe { self.rq.as_mut() }
    }
}

impl Drop for RequestRef<'_> {
    fn drop(&mut self) {
        let tag = self.tag as u32;
        self.set.release(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct NullBlkCmd {
        error: i32,
        retries: u16,
    }

    #[test]
    fn test_pdu_follows_request() {
        let set = TagSet::new(4, size_of::<NullBlkCmd>()).unwrap();
        let mut rq = set.alloc_request(ReqOp::Read, BlkMqReqFlags::empty()).unwrap();
        let pdu = blk_mq_rq_to_pdu(rq.as_ptr());
        assert_eq!(pdu as usize - rq.as_ptr() as usize, size_of::<Request>());
        assert_eq!(blk_mq_rq_from_pdu(pdu), rq.as_ptr());

        rq.pdu_mut::<NullBlkCmd>().retries = 3;
        rq.pdu_mut::<NullBlkCmd>().error = -5;
        let cmd = unsafe { &*pdu.cast::<NullBlkCmd>() };
        assert_eq!(cmd.retries, 3);
        assert_eq!(rq.pdu::<NullBlkCmd>().error, -5);
    }

    #[test]
    fn test_oversized_pdu_is_fatal() {
        let set = Arc::new(TagSet::new(1, 2).unwrap());
        let result = thread::spawn(move || {
            let rq = set.alloc_request(ReqOp::Read, BlkMqReqFlags::empty()).unwrap();
            let _ = rq.pdu::<u64>();
        })
        .join();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_depth() {
        assert_eq!(TagSet::new(0, 8).err(), Some(KernelError::EINVAL));
        assert_eq!(
            TagSet::new(BLK_MQ_MAX_DEPTH + 1, 8).err(),
            Some(KernelError::EINVAL)
        );
    }

    #[test]
    fn test_nowait_exhaustion() {
        let set = TagSet::new(2, 0).unwrap();
        let a = set.alloc_request(ReqOp::Read, BlkMqReqFlags::NOWAIT).unwrap();
        let b = set.alloc_request(ReqOp::Write, BlkMqReqFlags::NOWAIT).unwrap();
        assert_ne!(a.tag, b.tag);
        assert_eq!(
            set.alloc_request(ReqOp::Read, BlkMqReqFlags::NOWAIT).err(),
            Some(KernelError::EAGAIN)
        );
        drop(a);
        assert_eq!(set.nr_free(), 1);
        let c = set.alloc_request(ReqOp::Read, BlkMqReqFlags::NOWAIT).unwrap();
        assert_eq!(c.op(), Some(ReqOp::Read));
    }

    #[test]
    fn test_blocking_alloc_waits_for_free() {
        let set = Arc::new(TagSet::new(1, 0).unwrap());
        let held = set.alloc_request(ReqOp::Read, BlkMqReqFlags::empty()).unwrap();
        let got = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let set = Arc::clone(&set);
            let got = Arc::clone(&got);
            thread::spawn(move || {
                let rq = set.alloc_request(ReqOp::Write, BlkMqReqFlags::empty()).unwrap();
                got.store(1, Ordering::SeqCst);
                drop(rq);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(got.load(Ordering::SeqCst), 0);
        drop(held);
        waiter.join().unwrap();
        assert_eq!(got.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocking_alloc_in_atomic_is_fatal() {
        let set = Arc::new(TagSet::new(1, 0).unwrap());
        let result = thread::spawn(move || {
            kshim_core::context::preempt_disable();
            let _ = set.alloc_request(ReqOp::Read, BlkMqReqFlags::empty());
        })
        .join();
        assert!(result.is_err());
    }

    #[test]
    fn test_request_lifecycle_completes_bios() {
        unsafe extern "C" fn count(bio: *mut Bio) {
            (*(*bio).bi_private.cast::<AtomicUsize>()).fetch_add(1, Ordering::SeqCst);
        }
        let completed = AtomicUsize::new(0);
        let mut bios: Vec<Box<Bio>> = (0..2)
            .map(|i| {
                let mut bio = Bio::alloc(ReqOp::Write as u32, 64 + i * 8, 0);
                bio.bi_iter.bi_size = 4096;
                bio.bi_end_io = Some(count);
                bio.bi_private = (&completed as *const AtomicUsize).cast_mut().cast();
                bio
            })
            .collect();

        let set = TagSet::new(1, 0).unwrap();
        let mut rq = set.alloc_request(ReqOp::Write, BlkMqReqFlags::empty()).unwrap();
        for bio in bios.iter_mut() {
            unsafe { rq.append_bio(NonNull::from(&mut **bio)) };
        }
        assert_eq!(rq.pos(), 64);
        assert_eq!(rq.bytes(), 8192);
        assert_eq!(rq.sectors(), 16);
        assert_eq!(rq.state(), MqRqState::Idle);
        rq.start();
        assert_eq!(rq.state(), MqRqState::InFlight);
        rq.end(BlkStatus::OK);
        assert_eq!(rq.state(), MqRqState::Complete);
        assert_eq!(completed.load(Ordering::SeqCst), 2);
        assert!(bios.iter().all(|b| b.bi_status == BlkStatus::OK));
    }

    #[test]
    fn test_end_without_start_is_fatal() {
        let set = Arc::new(TagSet::new(1, 0).unwrap());
        let result = thread::spawn(move || {
            let mut rq = set.alloc_request(ReqOp::Read, BlkMqReqFlags::empty()).unwrap();
            rq.end(BlkStatus::IOERR);
        })
        .join();
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_pdu_bijection(depth in 1u32..32, cmd_size in 0usize..300) {
            let set = TagSet::new(depth, cmd_size).unwrap();
            let start = set.base.as_ptr() as usize;
            let end = start + set.layout.size();
            for tag in 0..depth {
                let rq = set.tag_to_rq(tag).unwrap().as_ptr();
                let pdu = blk_mq_rq_to_pdu(rq);
                prop_assert_eq!(blk_mq_rq_from_pdu(pdu), rq);
                prop_assert_eq!(blk_mq_rq_to_pdu(blk_mq_rq_from_pdu(pdu)), pdu);
                prop_assert_eq!(rq as usize % align_of::<Request>(), 0);
                // the PDU trails its request inside the tag set's block
                prop_assert!(pdu as usize >= rq as usize + size_of::<Request>());
                prop_assert!(pdu as usize + cmd_size <= end);
                prop_assert!(rq as usize >= start);
                if let Some(next) = set.tag_to_rq(tag + 1) {
                    prop_assert!(pdu as usize + cmd_size <= next.as_ptr() as usize);
                }
            }
        }
    }
}
