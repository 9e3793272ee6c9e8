//! Spinlock, mutex and RCU helpers

use core::ffi::c_void;

use kshim_core::IrqFlags;
use kshim_ffi::{c_char, c_ulong};

use crate::bug::{arg, arg_mut};
use crate::types::{lock_class_key, mutex, rcudata, spinlock_t};

/// Linux equivalent: `spin_lock_init(lock)`, or
/// `__raw_spin_lock_init(lock, name, key)` with lock debugging
///
/// # Safety
///
/// `lock` must be valid and not held. `name` and `key`, if non-null, must
/// outlive the lock.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_spin_lock_init(
    lock: *mut spinlock_t,
    name: *const c_char,
    key: *mut lock_class_key,
) {
    arg_mut(lock, "spin_lock_init").init(name, key);
}

/// Linux equivalent: `spin_lock(lock)`
///
/// # Safety
///
/// `lock` must point to an initialized spinlock.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_spin_lock(lock: *mut spinlock_t) {
    arg(lock, "spin_lock").lock();
}

/// Linux equivalent: `spin_unlock(lock)`
///
/// # Safety
///
/// `lock` must point to a spinlock held by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_spin_unlock(lock: *mut spinlock_t) {
    arg(lock, "spin_unlock").unlock();
}

/// Linux equivalent: `spin_lock_irqsave(lock, flags)`
///
/// Returns the saved interrupt state for the matching restore.
///
/// # Safety
///
/// `lock` must point to an initialized spinlock.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_spin_lock_irqsave(lock: *mut spinlock_t) -> c_ulong {
    arg(lock, "spin_lock_irqsave").lock_irqsave().as_raw()
}

/// Linux equivalent: `spin_unlock_irqrestore(lock, flags)`
///
/// # Safety
///
/// `lock` must be held by the caller and `flags` must come from the
/// matching `rust_helper_spin_lock_irqsave`.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_spin_unlock_irqrestore(lock: *mut spinlock_t, flags: c_ulong) {
    arg(lock, "spin_unlock_irqrestore").unlock_irqrestore(IrqFlags::from_raw(flags));
}

/// Linux equivalent: `mutex_init(lock)`
///
/// # Safety
///
/// `lock` must be valid and not held.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_mutex_init(lock: *mut mutex) {
    arg_mut(lock, "mutex_init").init();
}

/// Linux equivalent: `mutex_lock(lock)`. May sleep.
///
/// # Safety
///
/// `lock` must point to an initialized mutex.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_mutex_lock(lock: *mut mutex) {
    arg(lock, "mutex_lock").lock();
}

/// Linux equivalent: `mutex_unlock(lock)`
///
/// # Safety
///
/// `lock` must be held by the calling task.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_mutex_unlock(lock: *mut mutex) {
    arg(lock, "mutex_unlock").unlock();
}

/// Linux equivalent: `rcu_read_lock()`
#[no_mangle]
pub extern "C" fn rust_helper_rcu_read_lock() {
    kshim_sync::rcu_read_lock();
}

/// Linux equivalent: `rcu_read_unlock()`
#[no_mangle]
pub extern "C" fn rust_helper_rcu_read_unlock() {
    kshim_sync::rcu_read_unlock();
}

/// Linux equivalent: `synchronize_rcu()`. May sleep.
#[no_mangle]
pub extern "C" fn rust_helper_synchronize_rcu() {
    kshim_sync::synchronize_rcu();
}

/// Linux equivalent: `rcu_dereference(p->a)`
///
/// # Safety
///
/// `p` must be valid; the result may only be used inside the current
/// read-side section.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_rcu_dereference(p: *mut rcudata) -> *mut c_void {
    arg(p, "rcu_dereference").dereference()
}

/// Linux equivalent: `rcu_assign_pointer(p->a, v)`
///
/// # Safety
///
/// `p` must be valid and updates must be serialized by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_rcu_assign_pointer(p: *mut rcudata, v: *mut c_void) {
    arg(p, "rcu_assign_pointer").assign(v);
}
