//! Deferred cleanup callbacks (`struct delayed_call`)
//!
//! A link lookup hands back a callback that frees the returned buffer once
//! the caller is done with it.

use core::ffi::c_void;
use core::ptr;

pub type DelayedFn = unsafe extern "C" fn(arg: *mut c_void);

#[repr(C)]
#[derive(Debug)]
pub struct DelayedCall {
    func: Option<DelayedFn>,
    arg: *mut c_void,
}

impl DelayedCall {
    /// `DEFINE_DELAYED_CALL`
    pub const fn new() -> Self {
        Self {
            func: None,
            arg: ptr::null_mut(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.func.is_some()
    }
}

impl Default for DelayedCall {
    fn default() -> Self {
        Self::new()
    }
}

/// `set_delayed_call()`
///
/// # Safety
/// `func(arg)` must be sound to call once from whichever context later runs
/// [`do_delayed_call`].
pub unsafe fn set_delayed_call(call: &mut DelayedCall, func: DelayedFn, arg: *mut c_void) {
    call.func = Some(func);
    call.arg = arg;
}

/// `do_delayed_call()`: run the pending callback, if any. A call runs at
/// most once; repeating this is a no-op.
pub fn do_delayed_call(call: &mut DelayedCall) {
    if let Some(func) = call.func.take() {
        // SAFETY: the contract was accepted by `set_delayed_call`.
        unsafe { func(call.arg) };
    }
}

/// `clear_delayed_call()`: forget the callback without running it.
pub fn clear_delayed_call(call: &mut DelayedCall) {
    call.func = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn bump(arg: *mut c_void) {
        (*arg.cast::<AtomicUsize>()).fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn free_string(arg: *mut c_void) {
        drop(Box::from_raw(arg.cast::<String>()));
    }

    fn arg(counter: &AtomicUsize) -> *mut c_void {
        (counter as *const AtomicUsize).cast_mut().cast()
    }

    #[test]
    fn test_runs_at_most_once() {
        let counter = AtomicUsize::new(0);
        let mut call = DelayedCall::new();
        unsafe { set_delayed_call(&mut call, bump, arg(&counter)) };
        do_delayed_call(&mut call);
        do_delayed_call(&mut call);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!call.is_set());
    }

    #[test]
    fn test_cleared_call_never_runs() {
        let counter = AtomicUsize::new(0);
        let mut call = DelayedCall::default();
        unsafe { set_delayed_call(&mut call, bump, arg(&counter)) };
        clear_delayed_call(&mut call);
        do_delayed_call(&mut call);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unset_call_is_noop() {
        let mut call = DelayedCall::new();
        do_delayed_call(&mut call);
    }

    #[test]
    fn test_frees_link_body() {
        let body = Box::into_raw(Box::new(String::from("/target"))).cast::<c_void>();
        let mut call = DelayedCall::new();
        unsafe { set_delayed_call(&mut call, free_string, body) };
        assert!(call.is_set());
        do_delayed_call(&mut call);
    }
}
