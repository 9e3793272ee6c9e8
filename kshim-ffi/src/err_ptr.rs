//! Error-coded pointers (`include/linux/err.h`)
//!
//! Functions returning a pointer may instead return a negative errno cast to
//! a pointer. Such values live in the last page of the address space, which
//! is never mapped, so `IS_ERR` only has to compare against `-MAX_ERRNO`.
//!
//! [`from_err_ptr`] and [`to_err_ptr`] convert between this encoding and
//! `Result`; the raw encoding should not travel further than the C boundary.

use core::ffi::c_void;

use crate::error::{KernelError, KernelResult};
use crate::c_long;

pub const MAX_ERRNO: usize = 4095;

/// `IS_ERR_VALUE`: the value lies in the reserved error range.
#[inline]
pub const fn is_err_value(x: usize) -> bool {
    x >= (MAX_ERRNO as isize).wrapping_neg() as usize
}

/// `ERR_PTR`: encode a negative errno as a pointer.
#[inline]
pub fn err_ptr<T>(error: c_long) -> *mut T {
    error as isize as usize as *mut T
}

/// `IS_ERR`
#[inline]
pub fn is_err<T>(ptr: *const T) -> bool {
    is_err_value(ptr as usize)
}

/// `IS_ERR_OR_NULL`
#[inline]
pub fn is_err_or_null<T>(ptr: *const T) -> bool {
    ptr.is_null() || is_err(ptr)
}

/// `PTR_ERR`: the errno carried by `ptr`.
///
/// Only meaningful when [`is_err`] holds; for any other pointer the result
/// is the pointer value reinterpreted and carries no information.
#[inline]
pub fn ptr_err<T>(ptr: *const T) -> c_long {
    ptr as usize as isize as c_long
}

/// `ERR_CAST`: re-type an error pointer.
#[inline]
pub fn err_cast<T, U>(ptr: *const T) -> *mut U {
    ptr as *mut U
}

/// Converts a pointer that may carry an errno into a `Result`.
pub fn from_err_ptr<T>(ptr: *mut T) -> KernelResult<*mut T> {
    if is_err(ptr) {
        // IS_ERR bounds the value to [-MAX_ERRNO, -1], which fits a c_int.
        return Err(KernelError::from_errno(ptr_err(ptr) as crate::c_int));
    }
    Ok(ptr)
}

/// Encodes a `Result` the way a C function returning `T *` would.
pub fn to_err_ptr<T>(result: KernelResult<*mut T>) -> *mut T {
    match result {
        Ok(ptr) => ptr,
        Err(e) => err_ptr(e.to_errno() as c_long),
    }
}

/// Opaque `void *` view used by the C helpers.
pub type ErrPtr = *mut c_void;
