//! Error pointer helpers

use core::ffi::c_void;

use kshim_ffi::{c_char, c_int, c_long};

/// Linux equivalent: `ERR_PTR(error)`
#[no_mangle]
pub extern "C" fn rust_helper_ERR_PTR(error: c_long) -> *mut c_void {
    kshim_ffi::err_ptr(error)
}

/// Linux equivalent: `IS_ERR(ptr)`
#[no_mangle]
pub extern "C" fn rust_helper_IS_ERR(ptr: *const c_void) -> bool {
    kshim_ffi::is_err(ptr)
}

/// Linux equivalent: `PTR_ERR(ptr)`
///
/// Only meaningful when `rust_helper_IS_ERR(ptr)` is true.
#[no_mangle]
pub extern "C" fn rust_helper_PTR_ERR(ptr: *const c_void) -> c_long {
    kshim_ffi::ptr_err(ptr)
}

/// Linux equivalent: `errname(err)`
///
/// Symbolic name of an errno of either sign, or NULL if unknown.
#[no_mangle]
pub extern "C" fn rust_helper_errname(err: c_int) -> *const c_char {
    kshim_ffi::errname_c(err).map_or(core::ptr::null(), |name| name.as_ptr())
}
