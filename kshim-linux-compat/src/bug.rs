//! `BUG()`, `access_ok()` and null checks for incoming pointers

use core::ffi::c_void;

use kshim_ffi::{c_int, c_ulong};

/// Linux equivalent: `BUG()`
#[no_mangle]
pub extern "C" fn bug_helper() -> ! {
    kshim_core::bug!("BUG() called from foreign module")
}

/// Alias of [`bug_helper`] under the helper prefix.
#[no_mangle]
pub extern "C" fn rust_helper_bug() -> ! {
    bug_helper()
}

/// Linux equivalent: `access_ok(addr, n)`
///
/// Non-zero if the range lies in the user half of the address space.
#[no_mangle]
pub extern "C" fn access_ok_helper(addr: *const c_void, n: c_ulong) -> c_int {
    kshim_core::uaccess::access_ok(addr as c_ulong, n) as c_int
}

/// Borrow an argument the wrapped primitive would dereference. Null is the
/// hosted equivalent of an oops.
///
/// # Safety
/// A non-null `ptr` must be valid for `'a`.
pub(crate) unsafe fn arg<'a, T>(ptr: *const T, op: &'static str) -> &'a T {
    match ptr.as_ref() {
        Some(r) => r,
        None => kshim_core::bug!("NULL pointer dereference in {}", op),
    }
}

/// Mutable form of [`arg`].
///
/// # Safety
/// A non-null `ptr` must be valid and unaliased for `'a`.
pub(crate) unsafe fn arg_mut<'a, T>(ptr: *mut T, op: &'static str) -> &'a mut T {
    match ptr.as_mut() {
        Some(r) => r,
        None => kshim_core::bug!("NULL pointer dereference in {}", op),
    }
}

/// Non-null form of an argument that is passed on as a reference handle.
pub(crate) fn handle<T>(ptr: *mut T, op: &'static str) -> core::ptr::NonNull<T> {
    match core::ptr::NonNull::new(ptr) {
        Some(p) => p,
        None => kshim_core::bug!("NULL pointer dereference in {}", op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_ok() {
        assert_eq!(access_ok_helper(0x7000 as *const c_void, 64), 1);
        assert_eq!(access_ok_helper(usize::MAX as *const c_void, 2), 0);
    }
}
