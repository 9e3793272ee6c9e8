//! Page cache of one file (`struct address_space`)
//!
//! Folios in the cache are indexed by page offset and hold one reference
//! owned by the cache. Filling a missing or stale folio goes through the
//! filesystem's [`AddressSpaceOperations::read_folio`].

use core::ffi::c_void;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;
use std::collections::BTreeMap;

use kshim_core::context;
use kshim_ffi::{pgoff_t, GfpFlags, KernelError, KernelResult};
use kshim_sync::SpinLock;

use crate::folio::{folio_alloc, folio_get, folio_put, Folio};

/// Filesystem callbacks of a mapping (`struct address_space_operations`).
pub trait AddressSpaceOperations: Send + Sync {
    /// Start reading `folio`, which is locked and not uptodate.
    ///
    /// On success the implementation marks the folio uptodate once the data
    /// is in place. Either way it must unlock the folio, possibly later from
    /// another context.
    fn read_folio(&self, file: *mut c_void, folio: &Folio) -> KernelResult<()>;
}

/// `struct address_space`
pub struct AddressSpace {
    i_pages: SpinLock<BTreeMap<pgoff_t, NonNull<Folio>>>,
    a_ops: Box<dyn AddressSpaceOperations>,
    gfp_mask: GfpFlags,
    host: *mut c_void,
}

// SAFETY: cached folios are shared, reference counted objects; `host` is an
// opaque back pointer never dereferenced here.
unsafe impl Send for AddressSpace {}
unsafe impl Sync for AddressSpace {}

impl AddressSpace {
    pub fn new(a_ops: Box<dyn AddressSpaceOperations>) -> Self {
        Self {
            i_pages: SpinLock::new(BTreeMap::new()),
            a_ops,
            gfp_mask: GfpFlags::GFP_HIGHUSER | GfpFlags::__GFP_MOVABLE,
            host: ptr::null_mut(),
        }
    }

    /// `mapping_set_gfp_mask()`
    pub fn set_gfp_mask(&mut self, gfp: GfpFlags) {
        self.gfp_mask = gfp;
    }

    pub fn gfp_mask(&self) -> GfpFlags {
        self.gfp_mask
    }

    /// Attach the owning inode.
    pub fn set_host(&mut self, host: *mut c_void) {
        self.host = host;
    }

    pub fn host(&self) -> *mut c_void {
        self.host
    }

    /// Folios currently cached.
    pub fn nr_folios(&self) -> usize {
        self.i_pages.lock().len()
    }

    /// `filemap_get_folio()`: the cached folio at `index` with a new
    /// reference, or `ENOENT`.
    pub fn get_folio(&self, index: pgoff_t) -> KernelResult<NonNull<Folio>> {
        let pages = self.i_pages.lock();
        let folio = *pages.get(&index).ok_or(KernelError::ENOENT)?;
        // SAFETY: the cache holds a reference while the folio is indexed.
        unsafe { folio_get(folio) };
        Ok(folio)
    }

    /// `filemap_add_folio()`: insert a locked folio, transferring one extra
    /// reference to the cache. `EEXIST` if the index is taken.
    pub fn add_folio(&self, folio: NonNull<Folio>, index: pgoff_t) -> KernelResult<()> {
        // SAFETY: the caller holds a reference.
        let f = unsafe { folio.as_ref() };
        kshim_core::bug_on!(!f.test_locked(), "filemap_add_folio() of unlocked folio");
        let mut pages = self.i_pages.lock();
        if pages.contains_key(&index) {
            return Err(KernelError::EEXIST);
        }
        // SAFETY: as above.
        unsafe { folio_get(folio) };
        f.page().index.store(index as usize, Ordering::Relaxed);
        f.page()
            .mapping
            .store(self as *const Self as *mut Self, Ordering::Release);
        pages.insert(index, folio);
        Ok(())
    }

    /// `truncate_inode_pages()`: drop every cached folio from `start` on.
    /// May sleep.
    pub fn truncate(&self, start: pgoff_t) {
        context::might_sleep("truncate_inode_pages");
        let removed: Vec<NonNull<Folio>> = {
            let mut pages = self.i_pages.lock();
            let tail = pages.split_off(&start);
            tail.into_values().collect()
        };
        for folio in removed {
            // SAFETY: the cache's reference keeps it alive until the put.
            let f = unsafe { folio.as_ref() };
            f.lock();
            f.page().mapping.store(ptr::null_mut(), Ordering::Release);
            f.clear_uptodate();
            f.unlock();
            // SAFETY: drops the cache's reference.
            unsafe { folio_put(folio) };
        }
    }

    fn fill(&self, folio: NonNull<Folio>, file: *mut c_void) -> KernelResult<NonNull<Folio>> {
        // SAFETY: the caller holds a reference.
        let f = unsafe { folio.as_ref() };
        if let Err(e) = self.a_ops.read_folio(file, f) {
            tracing::debug!(index = f.index(), error = ?e, "read_folio failed");
            // SAFETY: drops the caller's reference.
            unsafe { folio_put(folio) };
            return Err(e);
        }
        f.wait_locked();
        if !f.test_uptodate() {
            // SAFETY: as above.
            unsafe { folio_put(folio) };
            return Err(KernelError::EIO);
        }
        Ok(folio)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let pages = core::mem::take(self.i_pages.get_mut());
        for folio in pages.into_values() {
            // SAFETY: drops the cache's reference; `&mut self` means no
            // concurrent lookups.
            unsafe {
                folio.as_ref().page().mapping.store(ptr::null_mut(), Ordering::Relaxed);
                folio_put(folio);
            }
        }
    }
}

/// `read_mapping_folio()`: the uptodate folio at `index`, reading it
/// through the mapping's `read_folio` if needed. Returns with a reference
/// the caller must put. May sleep.
pub fn read_mapping_folio(
    mapping: &AddressSpace,
    index: pgoff_t,
    file: *mut c_void,
) -> KernelResult<NonNull<Folio>> {
    context::might_sleep("read_mapping_folio");
    loop {
        let folio = match mapping.get_folio(index) {
            Ok(folio) => folio,
            Err(_) => {
                let folio = folio_alloc(mapping.gfp_mask(), 0)?;
                // SAFETY: freshly allocated, we hold the only reference.
                let f = unsafe { folio.as_ref() };
                kshim_core::bug_on!(!f.trylock(), "read_mapping_folio: new folio already locked");
                match mapping.add_folio(folio, index) {
                    Ok(()) => return mapping.fill(folio, file),
                    Err(_) => {
                        // Lost the race to another reader; use theirs.
                        f.unlock();
                        // SAFETY: drops our only reference.
                        unsafe { folio_put(folio) };
                        continue;
                    }
                }
            }
        };

        // SAFETY: `get_folio` returned a reference.
        let f = unsafe { folio.as_ref() };
        if f.test_uptodate() {
            return Ok(folio);
        }
        f.lock();
        if !ptr::eq(f.mapping(), mapping) {
            // Truncated while we waited.
            f.unlock();
            // SAFETY: drops the lookup reference.
            unsafe { folio_put(folio) };
            continue;
        }
        if f.test_uptodate() {
            f.unlock();
            return Ok(folio);
        }
        return mapping.fill(folio, file);
    }
}
