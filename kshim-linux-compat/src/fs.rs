//! Inode, dentry, file and delayed call helpers

use core::ffi::c_void;

use kshim_ffi::loff_t;
use kshim_fs::DelayedFn;

use crate::bug::{arg, arg_mut, handle};
use crate::types::{delayed_call, dentry, file, gid_t, inode, uid_t};

/// Linux equivalent: `i_size_read(inode)`
///
/// # Safety
///
/// `inode` must be live.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_i_size_read(inode: *const inode) -> loff_t {
    kshim_fs::i_size_read(arg(inode, "i_size_read"))
}

/// Linux equivalent: `i_uid_write(inode, uid)`
///
/// # Safety
///
/// `inode` must be live.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_i_uid_write(inode: *mut inode, uid: uid_t) {
    kshim_fs::i_uid_write(arg(inode, "i_uid_write"), uid);
}

/// Linux equivalent: `i_gid_write(inode, gid)`
///
/// # Safety
///
/// `inode` must be live.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_i_gid_write(inode: *mut inode, gid: gid_t) {
    kshim_fs::i_gid_write(arg(inode, "i_gid_write"), gid);
}

/// Linux equivalent: `inode_lock_shared(inode)`. May sleep.
///
/// # Safety
///
/// `inode` must be live until the matching unlock.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_inode_lock_shared(inode: *mut inode) {
    kshim_fs::inode_lock_shared(arg(inode, "inode_lock_shared"));
}

/// Linux equivalent: `inode_unlock_shared(inode)`
///
/// # Safety
///
/// `inode` must be held shared by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_inode_unlock_shared(inode: *mut inode) {
    kshim_fs::inode_unlock_shared(arg(inode, "inode_unlock_shared"));
}

/// Linux equivalent: `dget(dentry)`
///
/// NULL is passed through.
///
/// # Safety
///
/// A non-null `dentry` must be live and referenced by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_dget(dentry: *mut dentry) -> *mut dentry {
    match core::ptr::NonNull::new(dentry) {
        Some(d) => kshim_fs::dget(d).as_ptr(),
        None => dentry,
    }
}

/// Linux equivalent: `get_file(f)`
///
/// # Safety
///
/// `f` must be live and referenced by the caller.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_get_file(f: *mut file) -> *mut file {
    kshim_fs::get_file(handle(f, "get_file")).as_ptr()
}

/// Linux equivalent: `set_delayed_call(call, fn, arg)`
///
/// # Safety
///
/// `call` must be valid and `func(arg)` must be sound to run once later.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_set_delayed_call(
    call: *mut delayed_call,
    func: DelayedFn,
    data: *mut c_void,
) {
    kshim_fs::set_delayed_call(arg_mut(call, "set_delayed_call"), func, data);
}
