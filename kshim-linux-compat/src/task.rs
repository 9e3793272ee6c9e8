//! Task helpers

use kshim_ffi::c_int;

use crate::bug::{arg, handle};
use crate::types::task_struct;

/// Linux equivalent: `current`
///
/// The pointer is borrowed; it stays valid while the calling context runs.
#[no_mangle]
pub extern "C" fn rust_helper_get_current() -> *mut task_struct {
    kshim_core::task::current().as_ptr()
}

/// Linux equivalent: `get_task_struct(t)`
///
/// # Safety
///
/// `t` must point to a live task.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_get_task_struct(t: *mut task_struct) {
    kshim_core::task::get_task_struct(handle(t, "get_task_struct"));
}

/// Linux equivalent: `put_task_struct(t)`
///
/// # Safety
///
/// The caller's reference on `t` is consumed.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_put_task_struct(t: *mut task_struct) {
    kshim_core::task::put_task_struct(handle(t, "put_task_struct"));
}

/// Linux equivalent: `signal_pending(t)`
///
/// # Safety
///
/// `t` must point to a live task.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_signal_pending(t: *mut task_struct) -> c_int {
    arg(t, "signal_pending").signal_pending() as c_int
}
