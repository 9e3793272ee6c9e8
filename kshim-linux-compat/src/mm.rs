//! Page, folio and page cache helpers

use core::ffi::c_void;

use kshim_ffi::{c_int, c_uint, c_ulong, pgoff_t, GfpFlags, KernelResult};
use kshim_mm::{AddressSpace, AddressSpaceOperations, Folio};

use crate::bug::{arg, handle};
use crate::error::errno_to_result;
use crate::types::{address_space, folio, gfp_t, page};

/// `read_folio` as a foreign filesystem implements it: 0 or a negative
/// errno. The folio is locked on entry and must be unlocked by the callee.
pub type ReadFolioFn = unsafe extern "C" fn(file: *mut c_void, folio: *mut folio) -> c_int;

/// Address space operations backed by a foreign `read_folio`.
pub struct ForeignAddressSpaceOps {
    read_folio: ReadFolioFn,
}

impl ForeignAddressSpaceOps {
    pub fn new(read_folio: ReadFolioFn) -> Self {
        Self { read_folio }
    }
}

impl AddressSpaceOperations for ForeignAddressSpaceOps {
    fn read_folio(&self, file: *mut c_void, folio: &Folio) -> KernelResult<()> {
        let ptr = folio as *const Folio as *mut Folio;
        // SAFETY: the registering module promised a valid callback.
        errno_to_result(unsafe { (self.read_folio)(file, ptr) })
    }
}

/// A page cache whose misses are filled by a foreign `read_folio`.
pub fn foreign_address_space(read_folio: ReadFolioFn) -> AddressSpace {
    AddressSpace::new(Box::new(ForeignAddressSpaceOps::new(read_folio)))
}

/// Linux equivalent: `alloc_pages(gfp_mask, order)`
///
/// NULL on failure.
#[no_mangle]
pub extern "C" fn rust_helper_alloc_pages(gfp_mask: gfp_t, order: c_uint) -> *mut page {
    match kshim_mm::alloc_pages(GfpFlags::from_raw(gfp_mask), order) {
        Ok(p) => p.as_ptr(),
        Err(_) => core::ptr::null_mut(),
    }
}

/// Linux equivalent: `get_page(page)`
///
/// # Safety
///
/// `page` must be live and referenced by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_get_page(page: *mut page) {
    kshim_mm::get_page(handle(page, "get_page"));
}

/// Linux equivalent: `put_page(page)`
///
/// # Safety
///
/// The caller's reference is consumed.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_put_page(page: *mut page) {
    kshim_mm::put_page(handle(page, "put_page"));
}

/// Linux equivalent: `kmap(page)`. May sleep.
///
/// # Safety
///
/// `page` must be live until the matching `rust_helper_kunmap`.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_kmap(page: *mut page) -> *mut c_void {
    kshim_mm::kmap(arg(page, "kmap")).cast()
}

/// Linux equivalent: `kunmap(page)`
///
/// # Safety
///
/// `page` must be mapped with `rust_helper_kmap`.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_kunmap(page: *mut page) {
    kshim_mm::kunmap(arg(page, "kunmap"));
}

/// Linux equivalent: `kmap_atomic(page)`
///
/// Disables preemption until the matching `rust_helper_kunmap_atomic`.
///
/// # Safety
///
/// `page` must be live until unmapped.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_kmap_atomic(page: *mut page) -> *mut c_void {
    kshim_mm::kmap_atomic(arg(page, "kmap_atomic")).cast()
}

/// Linux equivalent: `kunmap_atomic(address)`
///
/// Mappings must be released in reverse order.
#[no_mangle]
pub extern "C" fn rust_helper_kunmap_atomic(address: *mut c_void) {
    kshim_mm::kunmap_atomic(address.cast::<u8>());
}

/// Linux equivalent: `folio_alloc(gfp, order)`
///
/// NULL on failure.
#[no_mangle]
pub extern "C" fn rust_helper_folio_alloc(gfp: gfp_t, order: c_uint) -> *mut folio {
    match kshim_mm::folio_alloc(GfpFlags::from_raw(gfp), order) {
        Ok(f) => f.as_ptr(),
        Err(_) => core::ptr::null_mut(),
    }
}

/// Linux equivalent: `folio_get(folio)`
///
/// # Safety
///
/// `folio` must be live and referenced by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_folio_get(folio: *mut folio) {
    kshim_mm::folio_get(handle(folio, "folio_get"));
}

/// Linux equivalent: `folio_put(folio)`
///
/// # Safety
///
/// The caller's reference is consumed.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_folio_put(folio: *mut folio) {
    kshim_mm::folio_put(handle(folio, "folio_put"));
}

/// Linux equivalent: `folio_test_uptodate(folio)`
///
/// # Safety
///
/// `folio` must be live.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_folio_test_uptodate(folio: *mut folio) -> bool {
    arg(folio, "folio_test_uptodate").test_uptodate()
}

/// Linux equivalent: `folio_mark_uptodate(folio)`
///
/// # Safety
///
/// `folio` must be live and its contents fully written.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_folio_mark_uptodate(folio: *mut folio) {
    arg(folio, "folio_mark_uptodate").mark_uptodate();
}

/// `folio_lock(folio)`, exported under its kernel name. May sleep.
///
/// # Safety
///
/// `folio` must be live.
#[no_mangle]
pub unsafe extern "C" fn folio_lock(folio: *mut folio) {
    arg(folio, "folio_lock").lock();
}

/// `folio_unlock(folio)`, exported under its kernel name.
///
/// Wakes waiters. Unlocking an unlocked folio is a BUG.
///
/// # Safety
///
/// `folio` must be live and locked.
#[no_mangle]
pub unsafe extern "C" fn folio_unlock(folio: *mut folio) {
    arg(folio, "folio_unlock").unlock();
}

/// Creates a page cache whose misses call `read_folio`.
///
/// Released with `rust_helper_address_space_destroy`.
#[no_mangle]
pub extern "C" fn rust_helper_address_space_create(read_folio: ReadFolioFn) -> *mut address_space {
    Box::into_raw(Box::new(foreign_address_space(read_folio)))
}

/// Drops every cached folio reference and frees the mapping.
///
/// # Safety
///
/// `mapping` must come from `rust_helper_address_space_create` and have no
/// callers inside `rust_helper_read_mapping_folio`. NULL is ignored.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_address_space_destroy(mapping: *mut address_space) {
    if !mapping.is_null() {
        drop(Box::from_raw(mapping));
    }
}

/// Linux equivalent: `read_mapping_folio(mapping, index, file)`. May sleep.
///
/// Returns a referenced, uptodate folio or an error pointer.
///
/// # Safety
///
/// `mapping` must be live for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_read_mapping_folio(
    mapping: *mut address_space,
    index: c_ulong,
    file: *mut c_void,
) -> *mut folio {
    let mapping = arg(mapping, "read_mapping_folio");
    kshim_ffi::to_err_ptr(
        kshim_mm::read_mapping_folio(mapping, index as pgoff_t, file).map(|f| f.as_ptr()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::{rust_helper_IS_ERR, rust_helper_PTR_ERR};
    use kshim_core::context;
    use kshim_ffi::{KernelError, PAGE_SIZE};

    /// Fills the folio with its index and zeroes the tail past 100 bytes.
    unsafe extern "C" fn read_index(_file: *mut c_void, folio: *mut folio) -> c_int {
        let f = &*folio;
        let head = [f.index() as u8; 100];
        if let Err(e) = f.write(0, &head) {
            folio_unlock(folio);
            return e.to_errno();
        }
        if let Err(e) = f.zero_out(head.len(), f.size() - head.len()) {
            folio_unlock(folio);
            return e.to_errno();
        }
        rust_helper_folio_mark_uptodate(folio);
        folio_unlock(folio);
        0
    }

    unsafe extern "C" fn read_fails(_file: *mut c_void, folio: *mut folio) -> c_int {
        folio_unlock(folio);
        KernelError::EIO.to_errno()
    }

    #[test]
    fn test_page_refs_and_kmap() {
        let p = rust_helper_alloc_pages(GfpFlags::GFP_KERNEL.bits(), 0);
        assert!(!p.is_null());
        unsafe {
            rust_helper_get_page(p);
            assert_eq!((*p).ref_count(), 2);
            let addr = rust_helper_kmap(p).cast::<u8>();
            *addr = 0xaa;
            rust_helper_kunmap(p);

            let atomic = rust_helper_kmap_atomic(p).cast::<u8>();
            assert!(context::in_atomic());
            assert_eq!(*atomic, 0xaa);
            rust_helper_kunmap_atomic(atomic.cast());
            assert!(!context::in_atomic());

            rust_helper_put_page(p);
            rust_helper_put_page(p);
        }
    }

    #[test]
    fn test_oversized_order_is_null() {
        assert!(rust_helper_alloc_pages(GfpFlags::GFP_KERNEL.bits(), 11).is_null());
        assert!(rust_helper_folio_alloc(GfpFlags::GFP_KERNEL.bits(), 11).is_null());
    }

    #[test]
    fn test_folio_uptodate_flag() {
        let f = rust_helper_folio_alloc(GfpFlags::GFP_KERNEL.bits(), 1);
        unsafe {
            assert!(!rust_helper_folio_test_uptodate(f));
            rust_helper_folio_mark_uptodate(f);
            assert!(rust_helper_folio_test_uptodate(f));
            rust_helper_folio_get(f);
            rust_helper_folio_put(f);
            assert_eq!((*f).nr_pages(), 2);
            rust_helper_folio_put(f);
        }
    }

    #[test]
    fn test_read_mapping_folio_through_foreign_fs() {
        let mut mapping = foreign_address_space(read_index);
        let f = unsafe { rust_helper_read_mapping_folio(&mut mapping, 4, core::ptr::null_mut()) };
        assert!(!rust_helper_IS_ERR(f.cast::<c_void>()));
        unsafe {
            let mut buf = [0u8; 2];
            (*f).read(99, &mut buf).unwrap();
            assert_eq!(buf, [4, 0]);
            let mut last = [1u8; 1];
            (*f).read(PAGE_SIZE - 1, &mut last).unwrap();
            assert_eq!(last, [0]);
            rust_helper_folio_put(f);
        }
    }

    #[test]
    fn test_folio_lock_exports() {
        let f = rust_helper_folio_alloc(GfpFlags::GFP_KERNEL.bits(), 0);
        unsafe {
            folio_lock(f);
            assert!((*f).test_locked());
            assert!(!(*f).trylock());
            folio_unlock(f);
            assert!(!(*f).test_locked());
            rust_helper_folio_put(f);
        }
    }

    #[test]
    fn test_created_address_space_caches_folios() {
        let mapping = rust_helper_address_space_create(read_index);
        unsafe {
            let first = rust_helper_read_mapping_folio(mapping, 3, core::ptr::null_mut());
            let again = rust_helper_read_mapping_folio(mapping, 3, core::ptr::null_mut());
            assert!(!rust_helper_IS_ERR(first.cast::<c_void>()));
            assert_eq!(first, again);
            assert!(!(*first).test_locked());
            rust_helper_folio_put(first);
            rust_helper_folio_put(again);
            rust_helper_address_space_destroy(mapping);
            rust_helper_address_space_destroy(core::ptr::null_mut());
        }
    }

    #[test]
    fn test_read_mapping_folio_error_pointer() {
        let mut mapping = foreign_address_space(read_fails);
        let f = unsafe { rust_helper_read_mapping_folio(&mut mapping, 0, core::ptr::null_mut()) };
        assert!(rust_helper_IS_ERR(f.cast::<c_void>()));
        assert_eq!(rust_helper_PTR_ERR(f.cast::<c_void>()), -5);
    }
}
