//! Page descriptors and temporary mappings
//!
//! A [`Page`] describes a power-of-two run of `PAGE_SIZE` bytes. Its
//! lifetime is governed by `_refcount`: [`get_page`] and [`put_page`] must
//! pair up, and the last put frees both the descriptor and the memory.
//!
//! Hosted pages are always addressable, so `kmap` returns the backing
//! address. The bookkeeping around it is what callers rely on: plain maps
//! may sleep and are counted per page, atomic and local maps disable
//! preemption and must be undone in strict LIFO order per context.

use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use kshim_core::context;
use kshim_core::runtime::runtime;
use kshim_core::Kref;
use kshim_ffi::{pgoff_t, GfpFlags, KernelError, KernelResult, MAX_ORDER, PAGE_MASK, PAGE_SIZE};

use crate::mapping::AddressSpace;

bitflags::bitflags! {
    /// `page->flags` bits
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const LOCKED = 1 << 0;
        const WRITEBACK = 1 << 1;
        const REFERENCED = 1 << 2;
        const UPTODATE = 1 << 3;
        const DIRTY = 1 << 4;
        const LRU = 1 << 5;
        const HEAD = 1 << 6;
        const ERROR = 1 << 7;
    }
}

/// `struct page`
#[repr(C)]
pub struct Page {
    pub(crate) flags: AtomicU32,
    refcount: Kref,
    kmap_count: AtomicU32,
    order: u32,
    pub(crate) index: AtomicUsize,
    pub(crate) mapping: AtomicPtr<AddressSpace>,
    virtual_addr: NonNull<u8>,
}

// SAFETY: all mutable state is atomic; the backing memory is shared like
// any kernel page and its users synchronize among themselves.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

fn backing_layout(order: u32) -> KernelResult<Layout> {
    Ok(Layout::from_size_align(PAGE_SIZE << order, PAGE_SIZE)?)
}

/// `alloc_pages()`: `2^order` contiguous pages holding one reference.
///
/// Sleeps only if `gfp` allows direct reclaim. Fails with `ENOMEM` under
/// memory pressure or for an order above `MAX_ORDER`.
pub fn alloc_pages(gfp: GfpFlags, order: u32) -> KernelResult<NonNull<Page>> {
    if gfp.allows_blocking() {
        context::might_sleep("alloc_pages");
    }
    if order > MAX_ORDER {
        if !gfp.contains(GfpFlags::__GFP_NOWARN) {
            tracing::warn!(order, "alloc_pages: order above MAX_ORDER");
        }
        return Err(KernelError::ENOMEM);
    }

    let nr = 1usize << order;
    if !runtime().reserve_pages(nr) {
        tracing::debug!(order, ?gfp, "alloc_pages: out of memory");
        return Err(KernelError::ENOMEM);
    }

    let layout = backing_layout(order)?;
    // SAFETY: the layout is non-zero sized.
    let raw = unsafe {
        if gfp.contains(GfpFlags::__GFP_ZERO) {
            std::alloc::alloc_zeroed(layout)
        } else {
            std::alloc::alloc(layout)
        }
    };
    let Some(virtual_addr) = NonNull::new(raw) else {
        runtime().release_pages(nr);
        return Err(KernelError::ENOMEM);
    };

    let page = Box::new(Page {
        flags: AtomicU32::new(0),
        refcount: Kref::new(),
        kmap_count: AtomicU32::new(0),
        order,
        index: AtomicUsize::new(0),
        mapping: AtomicPtr::new(ptr::null_mut()),
        virtual_addr,
    });
    tracing::trace!(order, addr = ?virtual_addr, "page allocated");
    Ok(NonNull::from(Box::leak(page)))
}

/// `alloc_page()`
pub fn alloc_page(gfp: GfpFlags) -> KernelResult<NonNull<Page>> {
    alloc_pages(gfp, 0)
}

/// `get_page()`
///
/// # Safety
/// `page` must be live and the caller must hold a reference to it.
pub unsafe fn get_page(page: NonNull<Page>) {
    page.as_ref().refcount.get();
}

/// `put_page()`: drop a reference, freeing the page on the last one.
///
/// # Safety
/// `page` must be live and the caller must own the reference it drops.
pub unsafe fn put_page(page: NonNull<Page>) {
    if page.as_ref().refcount.put() {
        free_page(page);
    }
}

unsafe fn free_page(page: NonNull<Page>) {
    let desc = Box::from_raw(page.as_ptr());
    let mapped = desc.kmap_count.load(Ordering::Relaxed);
    kshim_core::bug_on!(mapped != 0, "freeing page {:p} with {} live kmaps", page, mapped);
    kshim_core::bug_on!(
        !desc.mapping.load(Ordering::Relaxed).is_null(),
        "freeing page {:p} still in the page cache",
        page
    );
    if let Ok(layout) = backing_layout(desc.order) {
        std::alloc::dealloc(desc.virtual_addr.as_ptr(), layout);
    }
    runtime().release_pages(1 << desc.order);
    tracing::trace!(order = desc.order, "page freed");
}

impl Page {
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    /// Bytes covered by this allocation.
    pub fn size(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// `page_ref_count()`
    pub fn ref_count(&self) -> u32 {
        self.refcount.count()
    }

    /// Outstanding plain `kmap()` mappings.
    pub fn kmap_count(&self) -> u32 {
        self.kmap_count.load(Ordering::Relaxed)
    }

    /// `page->index`: offset inside the owning mapping, in pages.
    pub fn index(&self) -> pgoff_t {
        self.index.load(Ordering::Relaxed) as pgoff_t
    }

    /// `page_address()`
    pub fn address(&self) -> *mut u8 {
        self.virtual_addr.as_ptr()
    }

    /// Run `f` with a pointer `off` bytes into the page, valid for `len`
    /// bytes, or fail with `EINVAL` if the range leaves the page.
    fn with_pointer_into_page<T>(
        &self,
        off: usize,
        len: usize,
        f: impl FnOnce(*mut u8) -> KernelResult<T>,
    ) -> KernelResult<T> {
        match off.checked_add(len) {
            Some(end) if end <= PAGE_SIZE => {}
            _ => return Err(KernelError::EINVAL),
        }
        let addr = kmap_local_page(self);
        // SAFETY: `off` is at most PAGE_SIZE.
        let res = f(unsafe { addr.add(off) });
        kunmap_local(addr);
        res
    }

    /// Copy `len` bytes at `offset` in the page to `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for `len` bytes of writes, and no write to the
    /// same range of the page may run concurrently.
    pub unsafe fn read_raw(&self, dst: *mut u8, offset: usize, len: usize) -> KernelResult<()> {
        self.with_pointer_into_page(offset, len, |src| {
            ptr::copy_nonoverlapping(src, dst, len);
            Ok(())
        })
    }

    /// Copy `len` bytes from `src` into the page at `offset`.
    ///
    /// # Safety
    /// `src` must be valid for `len` bytes of reads, and no other access to
    /// the same range of the page may run concurrently.
    pub unsafe fn write_raw(&self, src: *const u8, offset: usize, len: usize) -> KernelResult<()> {
        self.with_pointer_into_page(offset, len, |dst| {
            ptr::copy_nonoverlapping(src, dst, len);
            Ok(())
        })
    }

    /// Zero `len` bytes at `offset`.
    ///
    /// # Safety
    /// No other access to the same range of the page may run concurrently.
    pub unsafe fn fill_zero_raw(&self, offset: usize, len: usize) -> KernelResult<()> {
        self.with_pointer_into_page(offset, len, |dst| {
            ptr::write_bytes(dst, 0, len);
            Ok(())
        })
    }

    /// Map the first page and run `f` on its contents.
    pub fn with_slice<T>(&self, f: impl FnOnce(&[u8]) -> KernelResult<T>) -> KernelResult<T> {
        self.with_pointer_into_page(0, PAGE_SIZE, |p| {
            // SAFETY: mapped and valid for PAGE_SIZE bytes; writers need
            // `&mut self`.
            f(unsafe { core::slice::from_raw_parts(p, PAGE_SIZE) })
        })
    }

    /// Map the first page and run `f` on its contents, mutably.
    pub fn with_slice_mut<T>(
        &mut self,
        f: impl FnOnce(&mut [u8]) -> KernelResult<T>,
    ) -> KernelResult<T> {
        self.with_pointer_into_page(0, PAGE_SIZE, |p| {
            // SAFETY: as above, and `&mut self` makes the access exclusive.
            f(unsafe { core::slice::from_raw_parts_mut(p, PAGE_SIZE) })
        })
    }
}

/// `kmap()`: map `page` for an unbounded time. May sleep.
pub fn kmap(page: &Page) -> *mut u8 {
    context::might_sleep("kmap");
    page.kmap_count.fetch_add(1, Ordering::Relaxed);
    page.address()
}

/// `kunmap()`
pub fn kunmap(page: &Page) {
    let prev = page.kmap_count.fetch_sub(1, Ordering::Relaxed);
    if prev == 0 {
        kshim_core::bug!("kunmap() of page {:p} that is not mapped", page);
    }
}

thread_local! {
    static KMAP_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn push_local_map(page: &Page) -> *mut u8 {
    context::preempt_disable();
    let addr = page.address();
    KMAP_STACK.with(|s| s.borrow_mut().push(addr as usize));
    addr
}

fn pop_local_map(addr: *const u8, op: &str) {
    let base = addr as usize & PAGE_MASK;
    KMAP_STACK.with(|s| {
        let mut stack = s.borrow_mut();
        match stack.last() {
            Some(&top) if top == base => {
                stack.pop();
            }
            Some(&top) => kshim_core::bug!(
                "{}({:#x}) out of order, innermost mapping is {:#x}",
                op,
                base,
                top
            ),
            None => kshim_core::bug!("{}({:#x}) with no local mappings", op, base),
        }
    });
    context::preempt_enable();
}

/// `kmap_atomic()`: map without sleeping. Preemption stays disabled until
/// the matching [`kunmap_atomic`].
pub fn kmap_atomic(page: &Page) -> *mut u8 {
    push_local_map(page)
}

/// `kunmap_atomic()`: `addr` must be the innermost atomic mapping of this
/// context.
pub fn kunmap_atomic(addr: *const u8) {
    pop_local_map(addr, "kunmap_atomic");
}

/// `kmap_local_page()`, same discipline as [`kmap_atomic`].
pub fn kmap_local_page(page: &Page) -> *mut u8 {
    push_local_map(page)
}

/// `kunmap_local()`
pub fn kunmap_local(addr: *const u8) {
    pop_local_map(addr, "kunmap_local");
}

/// Local mappings outstanding on this context.
pub fn local_map_depth() -> usize {
    KMAP_STACK.with(|s| s.borrow().len())
}
