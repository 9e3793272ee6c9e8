//! Allocation helpers under an exhausted memory budget
//!
//! The runtime is installed once per process, so this binary runs with a
//! zero page budget from its first allocation on.

use kshim_core::{install, HostedRuntime};
use kshim_ffi::GfpFlags;
use kshim_linux_compat::mm::{rust_helper_alloc_pages, rust_helper_folio_alloc};
use kshim_linux_compat::percpu::{
    rust_helper_alloc_percpu_longlong, rust_helper_free_percpu_longlong,
};

#[test]
fn test_allocators_return_null_without_budget() {
    install(Box::new(HostedRuntime::new(4, Some(0)).unwrap())).unwrap();

    assert!(rust_helper_alloc_pages(GfpFlags::GFP_ATOMIC.bits(), 0).is_null());
    assert!(rust_helper_folio_alloc(GfpFlags::GFP_ATOMIC.bits(), 0).is_null());
    for _ in 0..100 {
        assert!(rust_helper_alloc_percpu_longlong().is_null());
    }
    // the null a failed allocation returns is safe to free
    unsafe { rust_helper_free_percpu_longlong(core::ptr::null_mut()) };
}
