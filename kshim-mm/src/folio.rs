//! Folios
//!
//! A [`Folio`] is the head page of an allocation viewed as one unit: one
//! reference count, one lock bit and one uptodate bit for the whole run.
//! Uptodate is set with release ordering once I/O has filled the data, and
//! tested with acquire ordering, so a reader that sees it set also sees the
//! data.

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use kshim_core::context;
use kshim_ffi::{loff_t, pgoff_t, GfpFlags, KernelError, KernelResult, PAGE_SHIFT};
use parking_lot::{Condvar, Mutex};

use crate::mapping::AddressSpace;
use crate::page::{alloc_pages, get_page, put_page, Page, PageFlags};

/// `struct folio`
#[repr(transparent)]
pub struct Folio {
    page: Page,
}

/// `folio_alloc()`: a folio of `2^order` pages holding one reference.
pub fn folio_alloc(gfp: GfpFlags, order: u32) -> KernelResult<NonNull<Folio>> {
    let page = alloc_pages(gfp | GfpFlags::__GFP_COMP, order)?;
    if order > 0 {
        // SAFETY: freshly allocated, we hold the only reference.
        unsafe { page.as_ref() }
            .flags
            .fetch_or(PageFlags::HEAD.bits(), Ordering::Relaxed);
    }
    Ok(page.cast())
}

/// `folio_get()`
///
/// # Safety
/// As [`get_page`].
pub unsafe fn folio_get(folio: NonNull<Folio>) {
    get_page(folio.cast());
}

/// `folio_put()`
///
/// # Safety
/// As [`put_page`].
pub unsafe fn folio_put(folio: NonNull<Folio>) {
    put_page(folio.cast());
}

/// `page_folio()`
pub fn page_folio(page: &Page) -> &Folio {
    // SAFETY: `Folio` is a transparent wrapper over its head page, and
    // hosted allocations have no tail descriptors.
    unsafe { &*(page as *const Page).cast::<Folio>() }
}

struct WaitBucket {
    lock: Mutex<()>,
    wake: Condvar,
}

impl WaitBucket {
    const NEW: WaitBucket = WaitBucket {
        lock: Mutex::new(()),
        wake: Condvar::new(),
    };
}

const WAIT_TABLE_BITS: usize = 6;

/// Hashed waitqueues shared by all folios, like `folio_wait_table`.
static WAIT_TABLE: [WaitBucket; 1 << WAIT_TABLE_BITS] = [WaitBucket::NEW; 1 << WAIT_TABLE_BITS];

fn wait_bucket(folio: &Folio) -> &'static WaitBucket {
    let addr = folio as *const Folio as usize;
    let hash = (addr >> 6).wrapping_mul(0x9e37_79b9_7f4a_7c15_u64 as usize);
    &WAIT_TABLE[hash >> (usize::BITS as usize - WAIT_TABLE_BITS)]
}

impl Folio {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn as_page_ptr(&self) -> NonNull<Page> {
        NonNull::from(&self.page)
    }

    pub fn order(&self) -> u32 {
        self.page.order()
    }

    /// `folio_nr_pages()`
    pub fn nr_pages(&self) -> usize {
        1 << self.page.order()
    }

    /// `folio_size()`
    pub fn size(&self) -> usize {
        self.page.size()
    }

    /// `folio_index()`
    pub fn index(&self) -> pgoff_t {
        self.page.index()
    }

    /// `folio_pos()`: byte offset in the owning file.
    pub fn pos(&self) -> loff_t {
        (self.index() as loff_t) << PAGE_SHIFT
    }

    /// `folio->mapping`, null once truncated or when not in a page cache.
    pub fn mapping(&self) -> *const AddressSpace {
        self.page.mapping.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> u32 {
        self.page.ref_count()
    }

    fn test_flag(&self, flag: PageFlags, order: Ordering) -> bool {
        self.page.flags.load(order) & flag.bits() != 0
    }

    /// `folio_test_uptodate()`
    pub fn test_uptodate(&self) -> bool {
        self.test_flag(PageFlags::UPTODATE, Ordering::Acquire)
    }

    /// `folio_mark_uptodate()`: publish the folio contents.
    pub fn mark_uptodate(&self) {
        self.page
            .flags
            .fetch_or(PageFlags::UPTODATE.bits(), Ordering::Release);
    }

    /// `folio_clear_uptodate()`
    pub fn clear_uptodate(&self) {
        self.page
            .flags
            .fetch_and(!PageFlags::UPTODATE.bits(), Ordering::Relaxed);
    }

    /// `folio_test_locked()`
    pub fn test_locked(&self) -> bool {
        self.test_flag(PageFlags::LOCKED, Ordering::Relaxed)
    }

    /// `folio_trylock()`
    pub fn trylock(&self) -> bool {
        let prev = self
            .page
            .flags
            .fetch_or(PageFlags::LOCKED.bits(), Ordering::Acquire);
        prev & PageFlags::LOCKED.bits() == 0
    }

    /// `folio_lock()`. May sleep.
    pub fn lock(&self) {
        context::might_sleep("folio_lock");
        if self.trylock() {
            return;
        }
        let bucket = wait_bucket(self);
        let mut guard = bucket.lock.lock();
        while !self.trylock() {
            bucket.wake.wait(&mut guard);
        }
    }

    /// `folio_unlock()`
    pub fn unlock(&self) {
        let prev = self
            .page
            .flags
            .fetch_and(!PageFlags::LOCKED.bits(), Ordering::Release);
        if prev & PageFlags::LOCKED.bits() == 0 {
            kshim_core::bug!("folio_unlock() of unlocked folio {:p}", self);
        }
        let bucket = wait_bucket(self);
        let _guard = bucket.lock.lock();
        bucket.wake.notify_all();
    }

    /// `folio_wait_locked()`: wait for the lock bit to clear without
    /// taking it. May sleep.
    pub fn wait_locked(&self) {
        context::might_sleep("folio_wait_locked");
        if !self.test_locked() {
            return;
        }
        let bucket = wait_bucket(self);
        let mut guard = bucket.lock.lock();
        while self.test_locked() {
            bucket.wake.wait(&mut guard);
        }
    }

    /// Copy `data` into the folio at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> KernelResult<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: range checked; the caller holds the folio lock while
        // filling it, as `read_folio` implementations do.
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.page.address().add(offset),
                data.len(),
            )
        };
        Ok(())
    }

    /// Copy folio contents at `offset` into `out`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> KernelResult<()> {
        self.check_range(offset, out.len())?;
        // SAFETY: range checked.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.page.address().add(offset),
                out.as_mut_ptr(),
                out.len(),
            )
        };
        Ok(())
    }

    /// `folio_zero_range()`
    pub fn zero_out(&self, offset: usize, len: usize) -> KernelResult<()> {
        self.check_range(offset, len)?;
        // SAFETY: range checked.
        unsafe { core::ptr::write_bytes(self.page.address().add(offset), 0, len) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> KernelResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(KernelError::EINVAL),
        }
    }
}
